//! Rename an entity within its parent.

use ingen_api::{ClientMessage, Path, Status};

use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{self, GraphUpdate};
use crate::store::Entity;
use crate::undo::UndoOp;

/// The `Move` event: rename a block or port.
///
/// The new path must share the old path's parent; anything else is
/// `ParentDiffers`.
pub struct MoveEntity {
    base: EventBase,
    from: Path,
    to: Path,
    update: Option<GraphUpdate>,
}

impl MoveEntity {
    /// Creates the event.
    pub fn new(base: EventBase, from: Path, to: Path) -> Self {
        Self {
            base,
            from,
            to,
            update: None,
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
        let new_symbol = self.to.symbol().ok_or(Status::BadRequest)?;

        match ctx.store.resolve(&self.from) {
            Some(Entity::Port { port, .. }) => {
                port.set_symbol(new_symbol);
            }
            Some(Entity::Block(_)) => {
                let node = ctx.store.node_mut(&self.from).ok_or(Status::NotFound)?;
                node.set_symbol(new_symbol);
                // Recompile so the published task labels match.
                let (update, _) =
                    events::recompile(ctx, &from_parent).ok_or(Status::Internal)?;
                self.update = Some(update);
            }
            None => return Err(Status::NotFound),
        }

        ctx.undo.record(
            ctx.undo_mode,
            UndoOp::Move {
                from: self.to.clone(),
                to: self.from.clone(),
            },
        );
        Ok(())
    }
}

impl Event for MoveEntity {
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
        ctx.respond(&self.base, self.from.as_str());
        if self.base.is_ok() {
            ctx.broadcaster.rebase_cookies(&self.from, &self.to);
            ctx.broadcaster.send_all(ClientMessage::Move {
                from: self.from.clone(),
                to: self.to.clone(),
            });
        }
    }
}
