//! Delete a block or a graph port.

use std::sync::Arc;

use ingen_api::{ClientMessage, Path, Status};

use crate::block::RtBlock;
use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{self, GraphUpdate};
use crate::port::Port;
use crate::store::{Entity, Node, NodeKind};

/// Prepared removal of a graph boundary port.
struct PortRemoval {
    owner_rt: Arc<RtBlock>,
    new_ports: Option<Vec<Arc<Port>>>,
    old_ports: Option<Arc<Vec<Arc<Port>>>>,
    port: Arc<Port>,
}

/// The `Delete` event: remove an entity and everything attached to it.
///
/// The removed subtree rides in the event until post-processing, which
/// keeps it alive past the audio thread's compiled-graph swap.
pub struct Delete {
    base: EventBase,
    path: Path,
    updates: Vec<GraphUpdate>,
    removed_node: Option<Node>,
    removed_port: Option<PortRemoval>,
    cookies: Vec<u64>,
    disconnected: Vec<(Path, Path)>,
}

impl Delete {
    /// Creates the event.
    pub fn new(base: EventBase, path: Path) -> Self {
        Self {
            base,
            path,
            updates: Vec::new(),
            removed_node: None,
            removed_port: None,
            cookies: Vec::new(),
            disconnected: Vec::new(),
        }
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        if self.path.is_root() {
            return Err(Status::BadRequest);
        }
        match ctx.store.resolve(&self.path) {
            Some(Entity::Block(_)) => self.delete_block(ctx),
            Some(Entity::Port { .. }) => self.delete_port(ctx),
            None => Err(Status::NotFound),
        }?;

        // Reversing a deletion would need a subtree snapshot; the
        // history ends here instead.
        ctx.undo.clear();
        Ok(())
    }

    /// Severs every arc touching `slot` in the graph at `graph_path`,
    /// then prepares new source lists for the remaining heads.
    fn sever_block_arcs(
        &mut self,
        ctx: &mut PreContext<'_>,
        graph_path: &Path,
        slot: u32,
        update: &mut GraphUpdate,
    ) -> Result<(), Status> {
        let mut heads: Vec<Arc<Port>> = Vec::new();
        {
            let node = ctx.store.node_mut(graph_path).ok_or(Status::NotFound)?;
            let graph = node.graph_mut().ok_or(Status::BadRequest)?;
            for index in graph.arcs_touching_block(slot) {
                let arc = graph.remove_arc(index);
                // Heads on the deleted block itself need no new list.
                if arc.head_block != Some(slot)
                    && !heads.iter().any(|h| Arc::ptr_eq(h, &arc.head_port))
                {
                    heads.push(Arc::clone(&arc.head_port));
                }
                let tail = events::arc_end_path(graph_path, graph, arc.tail_block, &arc.tail_port);
                let head = events::arc_end_path(graph_path, graph, arc.head_block, &arc.head_port);
                if let (Some(tail), Some(head)) = (tail, head) {
                    self.disconnected.push((tail, head));
                }
            }
        }
        let node = ctx.store.node(graph_path).ok_or(Status::Internal)?;
        let graph = node.graph().ok_or(Status::Internal)?;
        for head in heads {
            let sources = events::head_sources(graph, &head);
            update.swap_sources(head, sources);
        }
        Ok(())
    }

    fn delete_block(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        let parent_path = self.path.parent().ok_or(Status::BadRequest)?;
        let symbol = self.path.symbol().ok_or(Status::BadRequest)?;

        let slot = {
            let parent = ctx.store.node(&parent_path).ok_or(Status::NotFound)?;
            let graph = parent.graph().ok_or(Status::BadRequest)?;
            graph.child_slot(symbol.as_str()).ok_or(Status::NotFound)?
        };

        let mut update = {
            let parent = ctx.store.node(&parent_path).ok_or(Status::NotFound)?;
            GraphUpdate::new(Arc::clone(&parent.rt))
        };
        self.sever_block_arcs(ctx, &parent_path, slot, &mut update)?;

        let removed = {
            let parent = ctx.store.node_mut(&parent_path).ok_or(Status::NotFound)?;
            let graph = parent.graph_mut().ok_or(Status::BadRequest)?;
            graph.remove_child(slot).ok_or(Status::NotFound)?
        };
        collect_cookies(&removed, &mut self.cookies);
        self.removed_node = Some(removed);

        let (compiled_update, _) = events::recompile(ctx, &parent_path).ok_or(Status::Internal)?;
        // Merge: keep our source swaps, take the fresh compiled graph.
        let mut compiled_update = compiled_update;
        std::mem::swap(&mut update.compiled, &mut compiled_update.compiled);
        self.updates.push(update);
        Ok(())
    }

    fn delete_port(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        let owner_path = self.path.parent().ok_or(Status::BadRequest)?;
        let symbol = self.path.symbol().ok_or(Status::BadRequest)?;

        let (port, owner_rt) = {
            let owner = ctx.store.node(&owner_path).ok_or(Status::NotFound)?;
            // Only graph boundary ports can be deleted; leaf block
            // ports are fixed by their plugin.
            owner.graph().ok_or(Status::BadRequest)?;
            let port = owner.port(symbol.as_str()).ok_or(Status::NotFound)?;
            (port, Arc::clone(&owner.rt))
        };

        // Sever inner-scope arcs (the graph's own port feeding or fed
        // by its children).
        let mut inner_update = GraphUpdate::new(Arc::clone(&owner_rt));
        self.sever_port_arcs(ctx, &owner_path, &port, &mut inner_update)?;
        let (inner_compiled, _) = events::recompile(ctx, &owner_path).ok_or(Status::Internal)?;
        let mut inner_compiled = inner_compiled;
        std::mem::swap(&mut inner_update.compiled, &mut inner_compiled.compiled);
        self.updates.push(inner_update);

        // Sever outer-scope arcs (the port as seen from the parent).
        if let Some(grand_path) = owner_path.parent() {
            let grand_rt = {
                let grand = ctx.store.node(&grand_path).ok_or(Status::NotFound)?;
                Arc::clone(&grand.rt)
            };
            let mut outer_update = GraphUpdate::new(grand_rt);
            self.sever_port_arcs(ctx, &grand_path, &port, &mut outer_update)?;
            let (outer_compiled, _) =
                events::recompile(ctx, &grand_path).ok_or(Status::Internal)?;
            let mut outer_compiled = outer_compiled;
            std::mem::swap(&mut outer_update.compiled, &mut outer_compiled.compiled);
            self.updates.push(outer_update);
        }

        let new_ports: Vec<Arc<Port>> = owner_rt
            .ports()
            .iter()
            .filter(|p| !Arc::ptr_eq(p, &port))
            .cloned()
            .collect();
        self.cookies.push(port.cookie());
        self.removed_port = Some(PortRemoval {
            owner_rt,
            new_ports: Some(new_ports),
            old_ports: None,
            port,
        });
        Ok(())
    }

    fn sever_port_arcs(
        &mut self,
        ctx: &mut PreContext<'_>,
        graph_path: &Path,
        port: &Arc<Port>,
        update: &mut GraphUpdate,
    ) -> Result<(), Status> {
        let mut heads: Vec<Arc<Port>> = Vec::new();
        {
            let node = ctx.store.node_mut(graph_path).ok_or(Status::NotFound)?;
            let graph = node.graph_mut().ok_or(Status::BadRequest)?;
            for index in graph.arcs_touching_port(port) {
                let arc = graph.remove_arc(index);
                if !Arc::ptr_eq(&arc.head_port, port)
                    && !heads.iter().any(|h| Arc::ptr_eq(h, &arc.head_port))
                {
                    heads.push(Arc::clone(&arc.head_port));
                }
                let tail = events::arc_end_path(graph_path, graph, arc.tail_block, &arc.tail_port);
                let head = events::arc_end_path(graph_path, graph, arc.head_block, &arc.head_port);
                if let (Some(tail), Some(head)) = (tail, head) {
                    self.disconnected.push((tail, head));
                }
            }
        }
        let node = ctx.store.node(graph_path).ok_or(Status::Internal)?;
        let graph = node.graph().ok_or(Status::Internal)?;
        for head in heads {
            let sources = events::head_sources(graph, &head);
            update.swap_sources(head, sources);
        }
        Ok(())
    }
}

/// Gathers broadcast cookies for the whole removed subtree.
fn collect_cookies(node: &Node, out: &mut Vec<u64>) {
    for port in node.rt.ports().iter() {
        out.push(port.cookie());
    }
    if let NodeKind::Graph(graph) = &node.kind {
        for (_, child) in graph.children() {
            collect_cookies(child, out);
        }
    }
}

impl Event for Delete {
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
        for update in &mut self.updates {
            update.execute();
        }
        if let Some(removal) = &mut self.removed_port {
            if let Some(ports) = removal.new_ports.take() {
                removal.old_ports = Some(removal.owner_rt.swap_ports(ports));
            }
        }
    }

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        ctx.respond(&self.base, self.path.as_str());
        if !self.base.is_ok() {
            return;
        }
        for cookie in self.cookies.drain(..) {
            ctx.broadcaster.unregister_cookie(cookie);
        }
        for (tail, head) in self.disconnected.drain(..) {
            ctx.broadcaster.send_all(ClientMessage::Disconnect { tail, head });
        }
        ctx.broadcaster.send_all(ClientMessage::Del {
            path: self.path.clone(),
        });

        // Release the removed subtree: recycle its buffers, then drop.
        if let Some(node) = self.removed_node.take() {
            recycle_node(&node, ctx);
        }
        if let Some(removal) = self.removed_port.take() {
            for buf in removal.port.take_voices() {
                ctx.factory.recycle(buf);
            }
        }
    }
}

fn recycle_node(node: &Node, ctx: &mut PostContext<'_>) {
    for port in node.rt.ports().iter() {
        for buf in port.take_voices() {
            ctx.factory.recycle(buf);
        }
    }
    if let NodeKind::Graph(graph) = &node.kind {
        for (_, child) in graph.children() {
            recycle_node(child, ctx);
        }
    }
}
