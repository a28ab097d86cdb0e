//! Duplicate a block (or subgraph) next to the original.

use std::sync::Arc;

use ingen_api::{ClientMessage, Path, Status, Symbol};

use crate::block::RtBlock;
use crate::compiled_graph::CompiledGraph;
use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{self, GraphUpdate};
use crate::internals;
use crate::port::Port;
use crate::store::{ArcEdge, GraphModel, Node, NodeKind};
use crate::undo::UndoOp;

/// The `Copy` event: duplicate an entity within its parent graph.
///
/// The copy gets fresh processors and buffers but preserves port
/// values and, for graphs, the whole child tree with its inner arcs.
pub struct Copy {
    base: EventBase,
    from: Path,
    to: Path,
    update: Option<GraphUpdate>,
    description: Vec<ClientMessage>,
}

impl Copy {
    /// Creates the event.
    pub fn new(base: EventBase, from: Path, to: Path) -> Self {
        Self {
            base,
            from,
            to,
            update: None,
            description: Vec::new(),
        }
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        let from_parent = self.from.parent().ok_or(Status::BadRequest)?;
        let to_parent = self.to.parent().ok_or(Status::BadRequest)?;
        if from_parent != to_parent {
            return Err(Status::ParentDiffers);
        }
        if ctx.store.exists(&self.to) {
            return Err(Status::Exists);
        }
        let symbol = self.to.symbol().ok_or(Status::BadRequest)?;

        // Borrow the source node and the copy machinery disjointly: the
        // cloner only needs the factory, the sample rate, and cookies.
        let copy = {
            let sample_rate = ctx.sample_rate;
            let factory = ctx.factory;
            let next_cookie = &mut *ctx.next_cookie;
            let source = ctx.store.node(&self.from).ok_or(Status::NotFound)?;
            clone_node(source, symbol, &self.to, factory, sample_rate, next_cookie)?
        };

        let parent = ctx.store.node_mut(&from_parent).ok_or(Status::NotFound)?;
        parent
            .graph_mut()
            .ok_or(Status::BadRequest)?
            .insert_child(copy);

        let (update, _) = events::recompile(ctx, &from_parent).ok_or(Status::Internal)?;
        self.update = Some(update);

        ctx.undo.record(
            ctx.undo_mode,
            UndoOp::Delete {
                path: self.to.clone(),
            },
        );
        self.description = events::describe(ctx.store, &self.to).unwrap_or_default();
        Ok(())
    }
}

/// Deep-copies a node under a new symbol.
///
/// The copy is quiescent (no compiled graph has ever scheduled it), so
/// its realtime state can be initialized directly.
fn clone_node(
    source: &Node,
    symbol: Symbol,
    path: &Path,
    factory: &crate::buffer_factory::BufferFactory,
    sample_rate: u32,
    next_cookie: &mut dyn FnMut() -> u64,
) -> Result<Node, Status> {
    let polyphony = source.polyphony;

    // Rebuild ports from the originals' specs, carrying over control
    // values and broadcast flags.
    let mut ports: Vec<Arc<Port>> = Vec::new();
    for (i, src_port) in source.rt.ports().iter().enumerate() {
        let mut port = Port::new(
            src_port.spec(),
            src_port.voice_count(),
            next_cookie(),
            factory,
        );
        port.set_index(i as u32);
        port.set_control_value(src_port.control_value());
        port.set_broadcasting(src_port.is_broadcasting());
        ports.push(Arc::new(port));
    }

    match &source.kind {
        NodeKind::Block { plugin } => {
            let descriptor = internals::descriptor(plugin).ok_or(Status::Internal)?;
            let processor = (descriptor.instantiate)(sample_rate, polyphony);
            let rt = RtBlock::internal(ports, polyphony, processor);
            Ok(Node::new(
                symbol,
                polyphony,
                NodeKind::Block {
                    plugin: plugin.clone(),
                },
                rt,
            ))
        }
        NodeKind::Graph(src_graph) => {
            let rt = RtBlock::graph(ports, polyphony);
            let mut graph = GraphModel::new(src_graph.polyphony);

            // Children first, recording the old-slot → new-slot map so
            // arc endpoints stay translatable.
            let mut slot_map: Vec<(u32, u32)> = Vec::new();
            for (old_slot, child) in src_graph.children() {
                let child_symbol = child.symbol().clone();
                let child_path = path.child(&child_symbol);
                let child_copy = clone_node(
                    child,
                    child_symbol,
                    &child_path,
                    factory,
                    sample_rate,
                    next_cookie,
                )?;
                let new_slot = graph.insert_child(child_copy);
                slot_map.push((old_slot, new_slot));
            }
            let map_slot = |old: u32| slot_map.iter().find(|(o, _)| *o == old).map(|(_, n)| *n);

            // Translate arcs: find each end's port on the copied side
            // by owner slot and port symbol.
            for arc in src_graph.arcs() {
                let tail = translate_end(&graph, rt.as_ref(), arc.tail_block, &arc.tail_port, &map_slot);
                let head = translate_end(&graph, rt.as_ref(), arc.head_block, &arc.head_port, &map_slot);
                if let (Some((tb, tp)), Some((hb, hp))) = (tail, head) {
                    graph.add_arc(ArcEdge {
                        tail_block: tb,
                        tail_port: tp,
                        head_block: hb,
                        head_port: hp,
                    });
                }
            }

            // Install mixing sources and an initial compiled graph
            // directly; nothing realtime sees this block yet.
            let heads: Vec<Arc<Port>> = graph
                .arcs()
                .iter()
                .map(|a| Arc::clone(&a.head_port))
                .collect();
            for head in heads {
                let sources = events::head_sources(&graph, &head);
                head.swap_sources(sources);
            }
            let (compiled, _) = CompiledGraph::compile(path, graph.compile_entries());
            rt.swap_compiled(Some(compiled));

            Ok(Node::new(symbol, polyphony, NodeKind::Graph(graph), rt))
        }
    }
}

type End = (Option<u32>, Arc<Port>);

fn translate_end(
    graph: &GraphModel,
    graph_rt: &RtBlock,
    old_block: Option<u32>,
    old_port: &Arc<Port>,
    map_slot: &impl Fn(u32) -> Option<u32>,
) -> Option<End> {
    let symbol = old_port.symbol();
    match old_block {
        None => graph_rt.port(symbol.as_str()).map(|p| (None, p)),
        Some(old_slot) => {
            let new_slot = map_slot(old_slot)?;
            let child = graph.child(new_slot)?;
            child.port(symbol.as_str()).map(|p| (Some(new_slot), p))
        }
    }
}

impl Event for Copy {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, ctx: &mut PreContext<'_>) {
        if let Err(status) = self.pre_process_inner(ctx) {
            self.base.set_error(status);
        }
    }

    fn execute(&mut self) {
        if let Some(update) = &mut self.update {
            update.execute();
        }
    }

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        ctx.respond(&self.base, self.to.as_str());
        if self.base.is_ok() {
            for msg in self.description.drain(..) {
                ctx.broadcaster.send_all(msg);
            }
        }
    }
}
