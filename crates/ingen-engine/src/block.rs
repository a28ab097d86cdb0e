//! Blocks: the processing units the compiled task tree executes.
//!
//! An [`RtBlock`] is the realtime face of a graph entity: its ports, its
//! voice count, and either an internal DSP processor or (for graph
//! blocks) the atomically replaceable compiled graph of its children.
//! The model side of the same entity (paths, arcs, adjacency) lives in
//! the [`Store`](crate::store::Store); the two share the block's ports.
//!
//! The port list is published through `ArcSwap` so graphs can grow
//! boundary ports while running: readers (the audio thread, the store)
//! always see a complete list, and replaced lists are retired through
//! the event that installed the new one.
//!
//! `run` is the per-cycle contract: mix inputs (`pre_process`), compute
//! (`process`), then broadcast and finalize outputs (`post_process`).

use std::sync::Arc;

use arc_swap::ArcSwap;
use arc_swap::ArcSwapOption;

use crate::buffer_factory::BufferFactory;
use crate::compiled_graph::CompiledGraph;
use crate::port::{Direction, Port, PortSpec};
use crate::run_context::RunContext;
use crate::rt_cell::RtCell;
use crate::worker::Workers;

/// A built-in DSP processor.
///
/// Implementations read their input port buffers and write their output
/// port buffers for the context window. They run on the audio thread:
/// no allocation, no locking, no blocking.
pub trait InternalBlock: Send {
    /// Computes one cycle.
    fn process(&mut self, ctx: &RunContext, ports: &[Arc<Port>]);

    /// Clears voice state (all-notes-off style reset).
    fn reset(&mut self) {}
}

pub(crate) enum RtKind {
    /// A leaf processor.
    Internal(RtCell<Box<dyn InternalBlock>>),
    /// A container; `process` delegates to the current compiled graph.
    Graph(ArcSwapOption<CompiledGraph>),
}

/// The realtime state of one block, shared between the store's model
/// tree and every compiled graph that schedules the block.
pub struct RtBlock {
    ports: ArcSwap<Vec<Arc<Port>>>,
    polyphony: u32,
    kind: RtKind,
}

impl RtBlock {
    /// Creates an internal (leaf) block.
    pub fn internal(
        ports: Vec<Arc<Port>>,
        polyphony: u32,
        processor: Box<dyn InternalBlock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ports: ArcSwap::from_pointee(ports),
            polyphony,
            kind: RtKind::Internal(RtCell::new(processor)),
        })
    }

    /// Creates a graph (container) block with no compiled graph yet.
    pub fn graph(ports: Vec<Arc<Port>>, polyphony: u32) -> Arc<Self> {
        Arc::new(Self {
            ports: ArcSwap::from_pointee(ports),
            polyphony,
            kind: RtKind::Graph(ArcSwapOption::empty()),
        })
    }

    /// Builds the port array for `specs`, assigning indices and voices.
    ///
    /// `polyphonic` ports get one buffer per voice; the rest are mono.
    pub fn build_ports(
        specs: &[(PortSpec, bool)],
        polyphony: u32,
        factory: &BufferFactory,
        mut next_cookie: impl FnMut() -> u64,
    ) -> Vec<Arc<Port>> {
        specs
            .iter()
            .enumerate()
            .map(|(i, (spec, polyphonic))| {
                let voices = if *polyphonic { polyphony as usize } else { 1 };
                let mut port = Port::new(spec.clone(), voices, next_cookie(), factory);
                port.set_index(i as u32);
                Arc::new(port)
            })
            .collect()
    }

    /// The block's ports, in index order.
    pub fn ports(&self) -> Arc<Vec<Arc<Port>>> {
        self.ports.load_full()
    }

    /// The port with the given symbol.
    pub fn port(&self, symbol: &str) -> Option<Arc<Port>> {
        self.ports
            .load()
            .iter()
            .find(|p| p.symbol().as_str() == symbol)
            .cloned()
    }

    /// Number of ports.
    pub fn port_count(&self) -> usize {
        self.ports.load().len()
    }

    /// Publishes a new port list, returning the old one for deferred
    /// reclamation.
    pub fn swap_ports(&self, new: Vec<Arc<Port>>) -> Arc<Vec<Arc<Port>>> {
        self.ports.swap(Arc::new(new))
    }

    /// Voice count.
    pub fn polyphony(&self) -> u32 {
        self.polyphony
    }

    /// True for graph (container) blocks.
    pub fn is_graph(&self) -> bool {
        matches!(self.kind, RtKind::Graph(_))
    }

    /// The current compiled graph of a graph block.
    pub fn compiled(&self) -> Option<Arc<CompiledGraph>> {
        match &self.kind {
            RtKind::Graph(slot) => slot.load_full(),
            RtKind::Internal(_) => None,
        }
    }

    /// Atomically installs a new compiled graph, returning the old one
    /// for deferred reclamation (audio thread, between cycles).
    pub fn swap_compiled(&self, new: Option<Arc<CompiledGraph>>) -> Option<Arc<CompiledGraph>> {
        match &self.kind {
            RtKind::Graph(slot) => slot.swap(new),
            RtKind::Internal(_) => None,
        }
    }

    /// Resets internal processor state.
    pub fn reset(&self) {
        if let RtKind::Internal(p) = &self.kind {
            p.borrow_rt().reset();
        }
    }

    // ── Per-cycle processing (audio thread) ──────────────────────────────

    /// Mixes inputs and prepares outputs.
    pub fn pre_process(&self, ctx: &RunContext) {
        for port in self.ports.load().iter() {
            port.pre_run(ctx);
        }
    }

    /// Computes the block's outputs for the context window.
    ///
    /// Internal blocks subdivide the cycle at the breakpoints of any
    /// value-typed sequence inputs, so a mid-cycle value change takes
    /// effect on its exact frame.
    pub fn process(&self, ctx: &RunContext, workers: &Workers) {
        match &self.kind {
            RtKind::Internal(p) => {
                let ports = self.ports.load_full();
                let processor = p.borrow_rt();
                let end = ctx.offset + ctx.nframes;
                let mut offset = ctx.offset;
                while offset < end {
                    let next = ports
                        .iter()
                        .filter(|port| {
                            port.direction() == Direction::Input && port.value_type().is_some()
                        })
                        .map(|port| port.buffer(0).get().next_value_offset(offset, end))
                        .min()
                        .unwrap_or(end);
                    if offset == ctx.offset && next == end {
                        processor.process(ctx, ports.as_slice());
                    } else {
                        processor.process(&ctx.slice(offset, next - offset), ports.as_slice());
                    }
                    offset = next;
                }
            }
            RtKind::Graph(slot) => {
                if let Some(compiled) = slot.load_full() {
                    compiled.run(ctx, workers);
                }
                // Graph outputs are fed by child arcs; mix them now that
                // the children have run.
                for port in self.ports.load().iter() {
                    if port.direction() == Direction::Output && port.source_count() > 0 {
                        port.mix_rt(ctx);
                    }
                }
            }
        }
    }

    /// Broadcasts and finalizes ports.
    pub fn post_process(&self, ctx: &RunContext) {
        for port in self.ports.load().iter() {
            port.post_run(ctx);
        }
    }

    /// One full cycle: pre, process, post.
    pub fn run(&self, ctx: &RunContext, workers: &Workers) {
        self.pre_process(ctx);
        self.process(ctx, workers);
        self.post_process(ctx);
    }
}

impl std::fmt::Debug for RtBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            RtKind::Internal(_) => "internal",
            RtKind::Graph(_) => "graph",
        };
        write!(
            f,
            "RtBlock({}, {} ports, {} voices)",
            kind,
            self.port_count(),
            self.polyphony
        )
    }
}
