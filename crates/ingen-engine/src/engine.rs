//! The engine facade: driver contract, options, and the audio cycle.
//!
//! A host driver calls [`Engine::activate`], then [`Engine::run`] once
//! per audio callback, then [`Engine::deactivate`]. Each `run`
//! establishes a [`RunContext`], drains pending graph-edit events from
//! the pre-processed queue (bounded per cycle), runs the root graph's
//! compiled task tree, and publishes the advanced cycle counter that
//! gates deferred reclamation.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use ingen_api::ClientMessage;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::block::RtBlock;
use crate::broadcaster::{Broadcaster, ClientId};
use crate::buffer_factory::BufferFactory;
use crate::event::{Event, EventBase};
use crate::events;
use crate::post_processor::PostProcessor;
use crate::pre_processor::PreProcessor;
use crate::run_context::{Notice, RunContext};
use crate::store::Store;
use crate::undo::UndoStack;
use crate::worker::Workers;

/// Core engine configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per cycle (and per pooled audio buffer).
    pub block_size: u32,
    /// Worker threads for parallel tasks; 0 or 1 disables fan-out.
    pub n_threads: usize,
    /// Maximum pending events in each queue.
    pub queue_size: usize,
    /// Dump each compiled graph after compilation.
    pub trace: bool,
    /// Maximum events applied per audio cycle.
    pub max_events_per_cycle: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 512,
            n_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_size: 256,
            trace: false,
            max_events_per_cycle: 128,
        }
    }
}

/// Errors from engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `activate` was called twice.
    #[error("engine is already activated")]
    AlreadyActive,
    /// The block size cannot change while entities hold buffers.
    #[error("cannot change the block size of a populated graph")]
    Populated,
}

/// State shared between the engine facade, the audio callback, and the
/// processor threads.
pub struct EngineCore {
    pub(crate) options: EngineOptions,
    pub(crate) store: RwLock<Store>,
    pub(crate) factory: BufferFactory,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) undo: Mutex<UndoStack>,
    pub(crate) workers: Workers,
    root_rt: Arc<RtBlock>,

    cookie_counter: AtomicU64,
    pub(crate) cycle: AtomicU64,
    frame: AtomicU64,
    pub(crate) activated: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    pub(crate) sample_rate: AtomicU32,
    /// Events accepted but not yet handed past pre-processing.
    pub(crate) pre_pending: AtomicU64,
    /// Events accepted but not yet fully post-processed.
    pub(crate) in_flight: AtomicU64,

    pub(crate) exec_tx: Sender<Box<dyn Event>>,
    exec_rx: Receiver<Box<dyn Event>>,
    pub(crate) post_tx: Sender<Box<dyn Event>>,
    pub(crate) post_rx: Receiver<Box<dyn Event>>,
    notice_tx: Sender<Notice>,
    pub(crate) notice_rx: Receiver<Notice>,
}

impl EngineCore {
    /// Next port broadcast cookie.
    pub(crate) fn next_cookie(&self) -> u64 {
        self.cookie_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The realtime graph engine.
pub struct Engine {
    core: Arc<EngineCore>,
    pre: PreProcessor,
    post: PostProcessor,
}

impl Engine {
    /// Builds an engine and starts its processor threads.
    pub fn new(options: EngineOptions) -> Self {
        let (exec_tx, exec_rx) = bounded(options.queue_size);
        let (post_tx, post_rx) = bounded(options.queue_size * 2);
        let (notice_tx, notice_rx) = bounded(256);

        let store = Store::new(1);
        let root_rt = Arc::clone(&store.root().rt);
        let factory = BufferFactory::new(options.block_size as usize);
        let workers = Workers::new(options.n_threads);
        let sample_rate = options.sample_rate;

        let core = Arc::new(EngineCore {
            options,
            store: RwLock::new(store),
            factory,
            broadcaster: Broadcaster::new(),
            undo: Mutex::new(UndoStack::new()),
            workers,
            root_rt,
            cookie_counter: AtomicU64::new(0),
            cycle: AtomicU64::new(0),
            frame: AtomicU64::new(0),
            activated: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            sample_rate: AtomicU32::new(sample_rate),
            pre_pending: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            exec_tx,
            exec_rx,
            post_tx,
            post_rx,
            notice_tx,
            notice_rx,
        });

        let pre = PreProcessor::start(Arc::clone(&core));
        let post = PostProcessor::start(Arc::clone(&core));
        Self { core, pre, post }
    }

    /// The engine's options.
    pub fn options(&self) -> &EngineOptions {
        &self.core.options
    }

    // ── Driver contract ──────────────────────────────────────────────────

    /// Prepares the engine for realtime callbacks.
    ///
    /// The block size may only change while no entities hold buffers.
    pub fn activate(&self, sample_rate: u32, block_size: u32) -> Result<(), EngineError> {
        if self.core.activated.load(Ordering::Acquire) {
            return Err(EngineError::AlreadyActive);
        }
        if block_size as usize != self.core.factory.audio_capacity() {
            let populated = {
                let store = self.core.store.read();
                store
                    .root()
                    .graph()
                    .map(|g| g.child_count() > 0)
                    .unwrap_or(false)
                    || self.core.root_rt.port_count() > 0
            };
            if populated {
                return Err(EngineError::Populated);
            }
            self.core.factory.set_audio_capacity(block_size as usize);
        }
        self.core.sample_rate.store(sample_rate, Ordering::Release);
        self.core.activated.store(true, Ordering::Release);
        log::info!("activated: {} Hz, {} frames per cycle", sample_rate, block_size);
        Ok(())
    }

    /// Stops accepting realtime callbacks.
    pub fn deactivate(&self) {
        self.core.activated.store(false, Ordering::Release);
    }

    /// True while activated.
    pub fn is_activated(&self) -> bool {
        self.core.activated.load(Ordering::Acquire)
    }

    /// Runs one audio cycle of `nframes`. Called by the driver from its
    /// realtime callback; never blocks.
    ///
    /// `transport_time` relocates the engine's absolute frame clock
    /// when given.
    ///
    /// Pending events are applied first (bounded per cycle, and only
    /// while the post-processing queue has room to take them), so the
    /// whole cycle runs against one consistent compiled graph.
    pub fn run(&self, nframes: u32, transport_time: Option<u64>) {
        if !self.core.activated.load(Ordering::Acquire) {
            return;
        }
        let core = &*self.core;
        if let Some(t) = transport_time {
            core.frame.store(t, Ordering::Release);
        }
        let cycle = core.cycle.load(Ordering::Acquire);
        let start = core.frame.load(Ordering::Acquire);
        let ctx = RunContext::new(
            start,
            nframes,
            core.sample_rate.load(Ordering::Acquire),
            true,
            core.notice_tx.clone(),
        );

        let mut applied = 0;
        while applied < core.options.max_events_per_cycle && !core.post_tx.is_full() {
            match core.exec_rx.try_recv() {
                Ok(mut event) => {
                    if event.base().is_ok() {
                        event.execute();
                    }
                    event.base_mut().executed_cycle = Some(cycle);
                    let _ = core.post_tx.try_send(event);
                    applied += 1;
                }
                Err(_) => break,
            }
        }

        core.root_rt.run(&ctx, &core.workers);

        core.frame.store(start + u64::from(nframes), Ordering::Release);
        core.cycle.store(cycle + 1, Ordering::Release);
    }

    /// The published cycle counter.
    pub fn cycle(&self) -> u64 {
        self.core.cycle.load(Ordering::Acquire)
    }

    /// The absolute frame clock.
    pub fn frame(&self) -> u64 {
        self.core.frame.load(Ordering::Acquire)
    }

    /// The root graph's realtime block, for driver access to boundary
    /// port buffers between cycles.
    pub fn root_block(&self) -> Arc<RtBlock> {
        Arc::clone(&self.core.root_rt)
    }

    /// The realtime block at `path`, if one exists.
    pub fn block(&self, path: &ingen_api::Path) -> Option<Arc<RtBlock>> {
        let store = self.core.store.read();
        store.node(path).map(|n| Arc::clone(&n.rt))
    }

    /// The compiled-graph dump of the graph at `path`, for diagnostics.
    pub fn dump_graph(&self, path: &ingen_api::Path) -> Option<String> {
        self.block(path)?.compiled().map(|c| c.dump())
    }

    // ── Client interface ─────────────────────────────────────────────────

    /// Registers a client to receive the outbound message stream.
    pub fn register_client(&self, sender: Sender<ClientMessage>) -> ClientId {
        self.core.broadcaster.register(sender)
    }

    /// Removes a client.
    pub fn unregister_client(&self, id: ClientId) {
        self.core.broadcaster.unregister(id);
    }

    /// Enqueues a request from a client.
    ///
    /// Returns false for message kinds that only flow outbound
    /// (`Response`, `Error`).
    pub fn message(&self, client: Option<ClientId>, request_id: i32, msg: ClientMessage) -> bool {
        let base = EventBase::new(client, request_id);
        let event: Box<dyn Event> = match msg {
            ClientMessage::Put { path, properties } => {
                Box::new(events::Create::new(base, path, properties))
            }
            ClientMessage::Delta { path, remove, add } => {
                Box::new(events::Delta::new(base, path, remove, add))
            }
            ClientMessage::Connect { tail, head } => {
                Box::new(events::Connect::new(base, tail, head))
            }
            ClientMessage::Disconnect { tail, head } => {
                Box::new(events::Disconnect::new(base, tail, head))
            }
            ClientMessage::DisconnectAll { parent, path } => {
                Box::new(events::DisconnectAll::new(base, parent, path))
            }
            ClientMessage::Move { from, to } => {
                Box::new(events::MoveEntity::new(base, from, to))
            }
            ClientMessage::Copy { from, to } => Box::new(events::Copy::new(base, from, to)),
            ClientMessage::Del { path } => Box::new(events::Delete::new(base, path)),
            ClientMessage::SetProperty {
                subject,
                key,
                value,
            } => Box::new(events::SetProperty::new(base, subject, key, value)),
            ClientMessage::Get { path } => Box::new(events::Get::new(base, path)),
            ClientMessage::Undo => Box::new(events::UndoRedo::new(base, false)),
            ClientMessage::Redo => Box::new(events::UndoRedo::new(base, true)),
            ClientMessage::BundleBegin { id } => Box::new(events::Bundle::new(base, id, true)),
            ClientMessage::BundleEnd { id } => Box::new(events::Bundle::new(base, id, false)),
            ClientMessage::Response { .. } | ClientMessage::Error { .. } => return false,
        };
        self.pre.event(event)
    }

    // ── Introspection / synchronization ──────────────────────────────────

    /// True when no events are queued or in flight anywhere.
    pub fn events_idle(&self) -> bool {
        self.core.in_flight.load(Ordering::Acquire) == 0
    }

    /// Waits until pre-processing has drained (events are prepared and
    /// waiting for the audio thread, or fully finished).
    pub fn flush_pre(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.core.pre_pending.load(Ordering::Acquire) != 0 {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        true
    }

    /// Waits until every queued event has fully completed.
    pub fn sync(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.events_idle() {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        true
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.deactivate();
        self.core.shutdown.store(true, Ordering::Release);
        self.post.shutdown();
    }
}
