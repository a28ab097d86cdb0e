//! Worker threads for parallel task execution.
//!
//! PARALLEL task nodes fan their children out over a fixed rayon pool.
//! Work is claimed through an atomic cursor so the posting thread helps
//! run children itself until the whole group completes; workers that are
//! busy simply never claim anything, which degrades to inline execution
//! on the posting thread.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::ThreadPool;

/// The engine's parallel task pool.
pub struct Workers {
    pool: Option<ThreadPool>,
}

impl Workers {
    /// Creates a pool of `n_threads` workers; zero or one disables
    /// parallel fan-out entirely.
    pub fn new(n_threads: usize) -> Self {
        let pool = if n_threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .thread_name(|i| format!("ingen-worker-{}", i))
                .build()
                .ok()
        } else {
            None
        };
        Self { pool }
    }

    /// Number of worker threads, zero when fan-out is disabled.
    pub fn thread_count(&self) -> usize {
        self.pool.as_ref().map(ThreadPool::current_num_threads).unwrap_or(0)
    }

    /// Runs `job(i)` for every `i < count`, potentially in parallel.
    ///
    /// The calling thread always participates; each job index is claimed
    /// exactly once. Returns when every job has finished.
    pub fn run_all<F>(&self, count: usize, job: F)
    where
        F: Fn(usize) + Sync,
    {
        if count == 0 {
            return;
        }
        if count == 1 {
            job(0);
            return;
        }
        match &self.pool {
            None => {
                for i in 0..count {
                    job(i);
                }
            }
            Some(pool) => {
                let cursor = AtomicUsize::new(0);
                let helpers = pool.current_num_threads().min(count - 1);
                pool.in_place_scope(|scope| {
                    for _ in 0..helpers {
                        scope.spawn(|_| {
                            loop {
                                let i = cursor.fetch_add(1, Ordering::Relaxed);
                                if i >= count {
                                    break;
                                }
                                job(i);
                            }
                        });
                    }
                    // The posting thread helps until the group is done.
                    loop {
                        let i = cursor.fetch_add(1, Ordering::Relaxed);
                        if i >= count {
                            break;
                        }
                        job(i);
                    }
                });
            }
        }
    }
}
