//! The graph-edit event kinds and their shared machinery.
//!
//! Structural events (create, delete, connect, disconnect, move) all
//! follow one shape: mutate the model during pre-processing, recompile
//! the affected graph, stash the replacement compiled graph and any
//! recomputed input-source lists in a [`GraphUpdate`], and install the
//! whole bundle with pointer swaps during `execute`.

pub mod bundle;
pub mod connect;
pub mod copy;
pub mod create;
pub mod delete;
pub mod disconnect;
pub mod get;
pub mod move_entity;
pub mod set_property;
pub mod undo_redo;

pub use bundle::Bundle;
pub use connect::Connect;
pub use copy::Copy;
pub use create::Create;
pub use delete::Delete;
pub use disconnect::{Disconnect, DisconnectAll};
pub use get::Get;
pub use move_entity::MoveEntity;
pub use set_property::{Delta, SetProperty};
pub use undo_redo::UndoRedo;

use std::sync::Arc;

use ingen_api::atom::uris;
use ingen_api::{keys, Atom, ClientMessage, Path, Properties, Status};

use crate::block::RtBlock;
use crate::compiled_graph::{CompiledGraph, FeedbackError};
use crate::event::PreContext;
use crate::port::{Direction, Port, PortSource, PortType};
use crate::store::{BlockSlot, Entity, GraphModel, Node, NodeKind, Store};

/// Prepared replacement state for one graph, installed atomically
/// during `execute` and carried to `post_process` as garbage.
pub(crate) struct GraphUpdate {
    graph_rt: Arc<RtBlock>,
    compiled: Option<Arc<CompiledGraph>>,
    /// (port, new source list) pairs to install.
    source_swaps: Vec<(Arc<Port>, Vec<PortSource>)>,
    /// Ports to clear after their last arc went away.
    clear_ports: Vec<Arc<Port>>,
    /// Displaced objects, freed in post-processing.
    old_compiled: Option<Arc<CompiledGraph>>,
    old_sources: Vec<Vec<PortSource>>,
}

impl GraphUpdate {
    pub(crate) fn new(graph_rt: Arc<RtBlock>) -> Self {
        Self {
            graph_rt,
            compiled: None,
            source_swaps: Vec::new(),
            clear_ports: Vec::new(),
            old_compiled: None,
            old_sources: Vec::new(),
        }
    }

    pub(crate) fn set_compiled(&mut self, compiled: Arc<CompiledGraph>) {
        self.compiled = Some(compiled);
    }

    pub(crate) fn swap_sources(&mut self, port: Arc<Port>, sources: Vec<PortSource>) {
        if sources.is_empty() {
            self.clear_ports.push(port.clone());
        }
        self.source_swaps.push((port, sources));
        // Displaced lists are collected during execute, which must not
        // allocate; give them their storage now.
        self.old_sources.reserve(self.source_swaps.len());
    }

    /// Installs everything (audio thread, between cycles).
    pub(crate) fn execute(&mut self) {
        if let Some(compiled) = self.compiled.take() {
            self.old_compiled = self.graph_rt.swap_compiled(Some(compiled));
        }
        for (port, sources) in self.source_swaps.drain(..) {
            self.old_sources.push(port.swap_sources(sources));
        }
        for port in self.clear_ports.drain(..) {
            port.clear_buffers();
        }
    }
}

/// Recompiles the graph at `path`, returning the prepared update and
/// any feedback diagnosis (the structural change still stands; the
/// graph just compiles to a no-op).
pub(crate) fn recompile(
    ctx: &mut PreContext<'_>,
    graph_path: &Path,
) -> Option<(GraphUpdate, Option<FeedbackError>)> {
    let node = ctx.store.node(graph_path)?;
    let graph = node.graph()?;
    let entries = graph.compile_entries();
    let (compiled, feedback) = CompiledGraph::compile(graph_path, entries);
    if ctx.trace {
        log::info!("{}", compiled.dump());
    }
    let mut update = GraphUpdate::new(Arc::clone(&node.rt));
    update.set_compiled(compiled);
    Some((update, feedback))
}

/// One resolved end of a prospective arc.
pub(crate) struct ArcEnd {
    /// Graph the end is visible in.
    pub scope: Path,
    /// Child slot within that graph, `None` for the graph's own port.
    pub block: Option<BlockSlot>,
    /// The port.
    pub port: Arc<Port>,
    /// True if the end can source data in this scope.
    pub is_source: bool,
}

/// Both ends of an arc resolved into a single common graph scope.
pub(crate) struct ResolvedArc {
    pub scope: Path,
    pub tail_block: Option<BlockSlot>,
    pub tail: Arc<Port>,
    pub head_block: Option<BlockSlot>,
    pub head: Arc<Port>,
}

/// The scopes a port is visible in: its block's parent graph, and (for
/// a graph's own ports) the graph itself.
fn port_scopes(store: &Store, port_path: &Path) -> Result<Vec<ArcEnd>, Status> {
    let owner_path = port_path.parent().ok_or(Status::BadRequest)?;
    let symbol = port_path.symbol().ok_or(Status::BadRequest)?;
    let owner = store.node(&owner_path).ok_or(Status::NotFound)?;
    let port = owner.port(symbol.as_str()).ok_or(Status::NotFound)?;

    let mut ends = Vec::new();

    // Visible from inside, when the owner is a graph: an input port
    // sources data to the children, an output port sinks it.
    if owner.graph().is_some() {
        ends.push(ArcEnd {
            scope: owner_path.clone(),
            block: None,
            port: port.clone(),
            is_source: port.direction() == Direction::Input,
        });
    }

    // Visible from the owner's parent graph, as a port on child `slot`.
    if let Some(parent_path) = owner_path.parent() {
        if let Some(parent) = store.node(&parent_path) {
            if let Some(graph) = parent.graph() {
                if let Some(slot) = graph.child_slot(owner.symbol().as_str()) {
                    ends.push(ArcEnd {
                        scope: parent_path,
                        block: Some(slot),
                        port: port.clone(),
                        is_source: port.direction() == Direction::Output,
                    });
                }
            }
        }
    }

    if ends.is_empty() {
        Err(Status::BadRequest)
    } else {
        Ok(ends)
    }
}

/// Resolves tail and head into their common graph scope, checking
/// directions and type compatibility.
pub(crate) fn resolve_arc(
    store: &Store,
    tail_path: &Path,
    head_path: &Path,
) -> Result<ResolvedArc, Status> {
    let tails = port_scopes(store, tail_path)?;
    let heads = port_scopes(store, head_path)?;

    for t in &tails {
        for h in &heads {
            if t.scope == h.scope {
                if !t.is_source || h.is_source {
                    return Err(Status::BadRequest);
                }
                if !t.port.port_type().can_connect(h.port.port_type()) {
                    return Err(Status::TypeMismatch);
                }
                return Ok(ResolvedArc {
                    scope: t.scope.clone(),
                    tail_block: t.block,
                    tail: t.port.clone(),
                    head_block: h.block,
                    head: h.port.clone(),
                });
            }
        }
    }
    Err(Status::BadRequest)
}

/// Computes the source list an input port should mix, from the arcs of
/// its scope graph.
pub(crate) fn head_sources(graph: &GraphModel, head: &Arc<Port>) -> Vec<PortSource> {
    graph
        .arcs()
        .iter()
        .filter(|a| Arc::ptr_eq(&a.head_port, head))
        .map(|a| a.tail_port.source_handle())
        .collect()
}

// ── Entity description (Put messages) ────────────────────────────────────

fn port_type_uri(pt: PortType) -> &'static str {
    match pt {
        PortType::Audio => uris::AUDIO_PORT,
        PortType::Cv => uris::CV_PORT,
        PortType::Control => uris::CONTROL_PORT,
        PortType::AtomSequence => uris::ATOM_PORT,
    }
}

/// Parses a port class URI.
pub(crate) fn port_type_from_uri(uri: &str) -> Option<PortType> {
    match uri {
        uris::AUDIO_PORT => Some(PortType::Audio),
        uris::CV_PORT => Some(PortType::Cv),
        uris::CONTROL_PORT => Some(PortType::Control),
        uris::ATOM_PORT => Some(PortType::AtomSequence),
        _ => None,
    }
}

fn describe_port(path: &Path, port: &Port) -> ClientMessage {
    let mut props = Properties::new();
    let type_uri = match port.direction() {
        Direction::Input => uris::INPUT_PORT,
        Direction::Output => uris::OUTPUT_PORT,
    };
    props.insert(keys::TYPE, Atom::Uri(type_uri.to_owned()));
    props.insert(keys::PORT_TYPE, Atom::Uri(port_type_uri(port.port_type()).to_owned()));
    if port.port_type() == PortType::Control {
        props.insert(keys::VALUE, Atom::Float(port.control_value()));
        let (min, max) = port.range();
        if let Some(min) = min {
            props.insert(keys::MINIMUM, Atom::Float(min));
        }
        if let Some(max) = max {
            props.insert(keys::MAXIMUM, Atom::Float(max));
        }
    }
    ClientMessage::Put {
        path: path.clone(),
        properties: props,
    }
}

pub(crate) fn arc_end_path(
    graph_path: &Path,
    graph: &GraphModel,
    block: Option<BlockSlot>,
    port: &Port,
) -> Option<Path> {
    let owner_path = match block {
        None => graph_path.clone(),
        Some(slot) => graph_path.child(graph.child(slot)?.symbol()),
    };
    Some(owner_path.child(&port.symbol()))
}

/// Describes the entity at `path` as a sequence of client messages:
/// a `Put` for the entity, one per port, and (for graphs) recursive
/// child descriptions plus `Connect` messages for the inner arcs.
pub(crate) fn describe(store: &Store, path: &Path) -> Option<Vec<ClientMessage>> {
    let mut out = Vec::new();
    match store.resolve(path)? {
        Entity::Port { port, .. } => out.push(describe_port(path, &port)),
        Entity::Block(node) => describe_node(path, node, &mut out),
    }
    Some(out)
}

fn describe_node(path: &Path, node: &Node, out: &mut Vec<ClientMessage>) {
    let mut props = node.properties.clone();
    match &node.kind {
        NodeKind::Graph(g) => {
            props.set(keys::TYPE, Atom::Uri(uris::GRAPH.to_owned()));
            props.set(keys::POLYPHONY, Atom::Int(g.polyphony as i32));
        }
        NodeKind::Block { plugin } => {
            props.set(keys::TYPE, Atom::Uri(uris::BLOCK.to_owned()));
            props.set(keys::PLUGIN, Atom::Uri(plugin.clone()));
            props.set(keys::POLYPHONIC, Atom::Bool(node.polyphony > 1));
        }
    }
    out.push(ClientMessage::Put {
        path: path.clone(),
        properties: props,
    });

    for port in node.rt.ports().iter() {
        out.push(describe_port(&path.child(&port.symbol()), port));
    }

    if let Some(graph) = node.graph() {
        for (_, child) in graph.children() {
            describe_node(&path.child(child.symbol()), child, out);
        }
        for arc in graph.arcs() {
            let tail = arc_end_path(path, graph, arc.tail_block, &arc.tail_port);
            let head = arc_end_path(path, graph, arc.head_block, &arc.head_port);
            if let (Some(tail), Some(head)) = (tail, head) {
                out.push(ClientMessage::Connect { tail, head });
            }
        }
    }
}
