//! Describe an entity to the requesting client.

use ingen_api::{ClientMessage, Path, Status};

use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events;

/// The `Get` event: snapshot an entity (recursively, for graphs) and
/// send the description to the requesting client only.
pub struct Get {
    base: EventBase,
    path: Path,
    description: Vec<ClientMessage>,
}

impl Get {
    /// Creates the event.
    pub fn new(base: EventBase, path: Path) -> Self {
        Self {
            base,
            path,
            description: Vec::new(),
        }
    }
}

impl Event for Get {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, ctx: &mut PreContext<'_>) {
        match events::describe(ctx.store, &self.path) {
            Some(description) => self.description = description,
            None => self.base.set_error(Status::NotFound),
        }
    }

    fn execute(&mut self) {}

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        if self.base.is_ok() {
            if let Some(client) = self.base.client {
                for msg in self.description.drain(..) {
                    ctx.broadcaster.send_to(client, msg);
                }
            }
        }
        ctx.respond(&self.base, self.path.as_str());
    }
}
