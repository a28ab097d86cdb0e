//! Connect an output port to an input port.

use std::sync::Arc;

use ingen_api::{ClientMessage, Path, Status};

use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{self, GraphUpdate};
use crate::store::ArcEdge;
use crate::undo::UndoOp;

/// The `Connect` event: add an arc between two ports.
pub struct Connect {
    base: EventBase,
    tail_path: Path,
    head_path: Path,
    update: Option<GraphUpdate>,
    feedback_warning: Option<String>,
}

impl Connect {
    /// Creates the event.
    pub fn new(base: EventBase, tail_path: Path, head_path: Path) -> Self {
        Self {
            base,
            tail_path,
            head_path,
            update: None,
            feedback_warning: None,
        }
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        let resolved = events::resolve_arc(ctx.store, &self.tail_path, &self.head_path)?;

        let scope_node = ctx.store.node_mut(&resolved.scope).ok_or(Status::NotFound)?;
        let graph = scope_node.graph_mut().ok_or(Status::Internal)?;

        if graph.find_arc(&resolved.tail, &resolved.head).is_some() {
            return Err(Status::Exists);
        }

        let self_loop = resolved.tail_block.is_some() && resolved.tail_block == resolved.head_block;

        graph.add_arc(ArcEdge {
            tail_block: resolved.tail_block,
            tail_port: resolved.tail.clone(),
            head_block: resolved.head_block,
            head_port: resolved.head.clone(),
        });

        let (mut update, feedback) =
            events::recompile(ctx, &resolved.scope).ok_or(Status::Internal)?;

        if self_loop {
            // The adjacency sets exclude self-edges, so the compiler
            // can't see this cycle; reject it here the same way.
            update.set_compiled(crate::compiled_graph::CompiledGraph::empty(
                resolved.scope.clone(),
            ));
            self.feedback_warning = Some(format!(
                "feedback: {} -> {} closes a delay-free loop",
                self.tail_path, self.head_path
            ));
        } else if let Some(e) = feedback {
            self.feedback_warning = Some(e.to_string());
        }

        // The head now mixes one more source.
        let scope_node = ctx.store.node(&resolved.scope).ok_or(Status::Internal)?;
        let graph = scope_node.graph().ok_or(Status::Internal)?;
        update.swap_sources(
            Arc::clone(&resolved.head),
            events::head_sources(graph, &resolved.head),
        );

        ctx.undo.record(
            ctx.undo_mode,
            UndoOp::Disconnect {
                tail: self.tail_path.clone(),
                head: self.head_path.clone(),
            },
        );
        self.update = Some(update);
        Ok(())
    }
}

impl Event for Connect {
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
        ctx.respond(&self.base, format!("{} -> {}", self.tail_path, self.head_path));
        if self.base.is_ok() {
            ctx.broadcaster.send_all(ClientMessage::Connect {
                tail: self.tail_path.clone(),
                head: self.head_path.clone(),
            });
            if let Some(warning) = self.feedback_warning.take() {
                ctx.broadcaster.send_all(ClientMessage::Error { message: warning });
            }
        }
    }
}
