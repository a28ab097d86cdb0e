//! The post-processing thread: responses, broadcasts, reclamation.
//!
//! Consumes executed events from the audio thread and finishes them off
//! the realtime path. An event that crossed the audio thread is held
//! until the published cycle counter has advanced past its execution
//! cycle, so nothing it still references can be freed under a cycle in
//! flight. The thread also drains the realtime notice channel into
//! client notifications.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::engine::EngineCore;
use crate::event::{Event, PostContext};

/// Handle to the post-processing thread.
pub struct PostProcessor {
    handle: Option<JoinHandle<()>>,
}

impl PostProcessor {
    /// Starts the thread.
    pub fn start(core: Arc<EngineCore>) -> Self {
        let handle = std::thread::Builder::new()
            .name("ingen-post".to_owned())
            .spawn(move || run(&core))
            .expect("spawn post-processor thread");
        Self {
            handle: Some(handle),
        }
    }

    /// Joins the thread (after the engine has closed the queues).
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(core: &EngineCore) {
    loop {
        // Forward realtime notices first; they are cheap and frequent.
        while let Ok(notice) = core.notice_rx.try_recv() {
            core.broadcaster.forward_notice(notice);
        }

        match core.post_rx.recv_timeout(Duration::from_millis(5)) {
            Ok(mut event) => {
                wait_past_cycle(core, event.base().executed_cycle);
                let mut ctx = PostContext {
                    broadcaster: &core.broadcaster,
                    factory: &core.factory,
                };
                event.post_process(&mut ctx);
                drop(event);
                core.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(RecvTimeoutError::Timeout) => {
                if core.shutdown.load(Ordering::Acquire) && core.post_rx.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Final notice drain on shutdown.
    while let Ok(notice) = core.notice_rx.try_recv() {
        core.broadcaster.forward_notice(notice);
    }
}

/// Blocks until the audio thread has published a cycle past `executed`.
///
/// Events that never crossed the audio thread carry no fence. The fence
/// also lifts if the engine deactivates, since no further cycle will
/// ever touch the displaced state.
fn wait_past_cycle(core: &EngineCore, executed: Option<u64>) {
    let executed = match executed {
        Some(cycle) => cycle,
        None => return,
    };
    while core.activated.load(Ordering::Acquire)
        && !core.shutdown.load(Ordering::Acquire)
        && core.cycle.load(Ordering::Acquire) <= executed
    {
        std::thread::sleep(Duration::from_micros(100));
    }
}
