//! Remove one arc, or every arc touching an entity.

use std::sync::Arc;

use ingen_api::{ClientMessage, Path, Status};

use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{self, GraphUpdate};
use crate::store::Entity;
use crate::undo::UndoOp;

/// The `Disconnect` event: remove the arc between two ports.
pub struct Disconnect {
    base: EventBase,
    tail_path: Path,
    head_path: Path,
    update: Option<GraphUpdate>,
}

impl Disconnect {
    /// Creates the event.
    pub fn new(base: EventBase, tail_path: Path, head_path: Path) -> Self {
        Self {
            base,
            tail_path,
            head_path,
            update: None,
        }
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        let resolved = events::resolve_arc(ctx.store, &self.tail_path, &self.head_path)?;

        let scope_node = ctx.store.node_mut(&resolved.scope).ok_or(Status::NotFound)?;
        let graph = scope_node.graph_mut().ok_or(Status::Internal)?;
        let index = graph
            .find_arc(&resolved.tail, &resolved.head)
            .ok_or(Status::NotFound)?;
        graph.remove_arc(index);

        let (mut update, _) = events::recompile(ctx, &resolved.scope).ok_or(Status::Internal)?;

        let scope_node = ctx.store.node(&resolved.scope).ok_or(Status::Internal)?;
        let graph = scope_node.graph().ok_or(Status::Internal)?;
        update.swap_sources(
            Arc::clone(&resolved.head),
            events::head_sources(graph, &resolved.head),
        );

        ctx.undo.record(
            ctx.undo_mode,
            UndoOp::Connect {
                tail: self.tail_path.clone(),
                head: self.head_path.clone(),
            },
        );
        self.update = Some(update);
        Ok(())
    }
}

impl Event for Disconnect {
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
        ctx.respond(&self.base, format!("{} -x- {}", self.tail_path, self.head_path));
        if self.base.is_ok() {
            ctx.broadcaster.send_all(ClientMessage::Disconnect {
                tail: self.tail_path.clone(),
                head: self.head_path.clone(),
            });
        }
    }
}

/// The `DisconnectAll` event: sever every arc touching a block or port
/// within one parent graph.
pub struct DisconnectAll {
    base: EventBase,
    parent: Path,
    path: Path,
    update: Option<GraphUpdate>,
    removed: Vec<(Path, Path)>,
}

impl DisconnectAll {
    /// Creates the event.
    pub fn new(base: EventBase, parent: Path, path: Path) -> Self {
        Self {
            base,
            parent,
            path,
            update: None,
            removed: Vec::new(),
        }
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        if !ctx.store.exists(&self.path) {
            return Err(Status::NotFound);
        }
        let parent_node = ctx.store.node(&self.parent).ok_or(Status::NotFound)?;
        let graph = parent_node.graph().ok_or(Status::BadRequest)?;

        // The target is either a child block of `parent` or a port
        // visible in `parent`'s scope.
        let indices = match ctx.store.resolve(&self.path) {
            Some(Entity::Port { port, .. }) => graph.arcs_touching_port(&port),
            Some(Entity::Block(_)) => {
                let symbol = self.path.symbol().ok_or(Status::BadRequest)?;
                match (self.path.parent().as_ref() == Some(&self.parent))
                    .then(|| graph.child_slot(symbol.as_str()))
                    .flatten()
                {
                    Some(slot) => graph.arcs_touching_block(slot),
                    None => return Err(Status::BadRequest),
                }
            }
            None => return Err(Status::NotFound),
        };
        if indices.is_empty() {
            // Nothing to sever; still a success.
            return Ok(());
        }

        // Record paths and affected heads, then remove (indices are
        // descending, so removal doesn't shift later ones).
        let mut heads = Vec::new();
        {
            let parent_node = ctx.store.node_mut(&self.parent).ok_or(Status::NotFound)?;
            let graph = parent_node.graph_mut().ok_or(Status::BadRequest)?;
            for index in indices {
                let arc = graph.remove_arc(index);
                if !heads.iter().any(|h| Arc::ptr_eq(h, &arc.head_port)) {
                    heads.push(Arc::clone(&arc.head_port));
                }
                let tail = events::arc_end_path(&self.parent, graph, arc.tail_block, &arc.tail_port);
                let head = events::arc_end_path(&self.parent, graph, arc.head_block, &arc.head_port);
                if let (Some(tail), Some(head)) = (tail, head) {
                    self.removed.push((tail, head));
                }
            }
        }

        let (mut update, _) = events::recompile(ctx, &self.parent).ok_or(Status::Internal)?;
        let parent_node = ctx.store.node(&self.parent).ok_or(Status::Internal)?;
        let graph = parent_node.graph().ok_or(Status::Internal)?;
        for head in heads {
            let sources = events::head_sources(graph, &head);
            update.swap_sources(head, sources);
        }

        for (tail, head) in &self.removed {
            ctx.undo.record(
                ctx.undo_mode,
                UndoOp::Connect {
                    tail: tail.clone(),
                    head: head.clone(),
                },
            );
        }
        self.update = Some(update);
        Ok(())
    }
}

impl Event for DisconnectAll {
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
        ctx.respond(&self.base, self.path.as_str());
        if self.base.is_ok() {
            for (tail, head) in self.removed.drain(..) {
                ctx.broadcaster.send_all(ClientMessage::Disconnect { tail, head });
            }
        }
    }
}
