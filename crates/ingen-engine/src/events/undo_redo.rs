//! Replay recorded inverse operations.

use ingen_api::Status;

use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{Connect, Delete, Disconnect, MoveEntity, SetProperty};
use crate::undo::{UndoMode, UndoOp};

/// The `Undo`/`Redo` event.
///
/// Pops the journal and replays the inverse as a nested event sharing
/// this event's phases. The nested event has no client of its own, so
/// only its broadcasts reach the stream; the response belongs to the
/// undo request.
pub struct UndoRedo {
    base: EventBase,
    redo: bool,
    inner: Option<Box<dyn Event>>,
}

impl UndoRedo {
    /// Creates an undo (or redo) event.
    pub fn new(base: EventBase, redo: bool) -> Self {
        Self {
            base,
            redo,
            inner: None,
        }
    }

    fn build_inner(op: UndoOp) -> Box<dyn Event> {
        let base = EventBase::new(None, 0);
        match op {
            UndoOp::Connect { tail, head } => Box::new(Connect::new(base, tail, head)),
            UndoOp::Disconnect { tail, head } => Box::new(Disconnect::new(base, tail, head)),
            UndoOp::Move { from, to } => Box::new(MoveEntity::new(base, from, to)),
            UndoOp::SetProperty {
                subject,
                key,
                value,
            } => Box::new(SetProperty::new(base, subject, key, value)),
            UndoOp::Delete { path } => Box::new(Delete::new(base, path)),
        }
    }
}

impl Event for UndoRedo {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, ctx: &mut PreContext<'_>) {
        let op = if self.redo {
            ctx.undo.pop_redo()
        } else {
            ctx.undo.pop_undo()
        };
        let op = match op {
            Some(op) => op,
            None => {
                self.base.set_error(Status::BadRequest);
                return;
            }
        };

        let mut inner = Self::build_inner(op);
        let saved_mode = ctx.undo_mode;
        ctx.undo_mode = if self.redo {
            UndoMode::Redoing
        } else {
            UndoMode::Undoing
        };
        inner.pre_process(ctx);
        ctx.undo_mode = saved_mode;

        self.base.set_error(inner.base().status);
        self.inner = Some(inner);
    }

    fn execute(&mut self) {
        if let Some(inner) = &mut self.inner {
            if inner.base().is_ok() {
                inner.execute();
            }
        }
    }

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        if let Some(inner) = &mut self.inner {
            inner.post_process(ctx);
        }
        ctx.respond(&self.base, if self.redo { "redo" } else { "undo" });
    }
}
