//! The pre-processing worker: serialises graph edits into the audio
//! thread's cycle.
//!
//! Any non-realtime thread enqueues events; one worker thread
//! pre-processes them in enqueue order under the store write lock, then
//! hands them to the audio thread through a bounded channel the audio
//! thread drains wait-free at cycle start. While the engine is
//! deactivated there is no audio thread to install prepared state, so
//! the worker executes events itself (the graph is quiescent) and
//! passes them straight to post-processing.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::engine::EngineCore;
use crate::event::{Event, PreContext};
use crate::undo::UndoMode;

/// Handle to the pre-processing worker thread.
pub struct PreProcessor {
    core: Arc<EngineCore>,
    tx: Option<Sender<Box<dyn Event>>>,
    handle: Option<JoinHandle<()>>,
}

impl PreProcessor {
    /// Starts the worker.
    pub fn start(core: Arc<EngineCore>) -> Self {
        let (tx, rx) = bounded::<Box<dyn Event>>(core.options.queue_size);
        let worker_core = Arc::clone(&core);
        let handle = std::thread::Builder::new()
            .name("ingen-pre".to_owned())
            .spawn(move || {
                while let Ok(mut event) = rx.recv() {
                    pre_process_one(&worker_core, event.as_mut());
                    dispatch(&worker_core, event);
                    worker_core.pre_pending.fetch_sub(1, Ordering::AcqRel);
                }
            })
            .expect("spawn pre-processor thread");
        Self {
            core,
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Enqueues an event. Safe to call from any non-realtime thread;
    /// blocks when the queue is full.
    ///
    /// Returns false after shutdown.
    pub fn event(&self, event: Box<dyn Event>) -> bool {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return false,
        };
        self.core.pre_pending.fetch_add(1, Ordering::AcqRel);
        self.core.in_flight.fetch_add(1, Ordering::AcqRel);
        if tx.send(event).is_ok() {
            true
        } else {
            self.core.pre_pending.fetch_sub(1, Ordering::AcqRel);
            self.core.in_flight.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }
}

impl Drop for PreProcessor {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn pre_process_one(core: &EngineCore, event: &mut dyn Event) {
    let mut store = core.store.write();
    let mut undo = core.undo.lock();
    let mut next_cookie = || core.next_cookie();
    let mut ctx = PreContext {
        store: &mut store,
        factory: &core.factory,
        undo: &mut undo,
        undo_mode: UndoMode::Normal,
        sample_rate: core.sample_rate.load(Ordering::Acquire),
        trace: core.options.trace,
        next_cookie: &mut next_cookie,
    };
    event.pre_process(&mut ctx);
}

fn dispatch(core: &EngineCore, mut event: Box<dyn Event>) {
    if core.activated.load(Ordering::Acquire) {
        // The audio thread executes and forwards to post-processing.
        let _ = core.exec_tx.send(event);
    } else {
        // No audio thread; the graph is quiescent and the prepared
        // state can be installed here.
        if event.base().is_ok() {
            event.execute();
        }
        let _ = core.post_tx.send(event);
    }
}
