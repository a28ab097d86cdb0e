//! Atomic message-group markers.

use ingen_api::ClientMessage;

use crate::event::{Event, EventBase, PostContext, PreContext};

/// The `BundleBegin`/`BundleEnd` marker event.
///
/// Bundles group messages for clients; the engine itself applies the
/// contained events one by one in order, so the markers only need to be
/// echoed to the stream.
pub struct Bundle {
    base: EventBase,
    id: i32,
    begin: bool,
}

impl Bundle {
    /// Creates a bundle marker.
    pub fn new(base: EventBase, id: i32, begin: bool) -> Self {
        Self { base, id, begin }
    }
}

impl Event for Bundle {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, _ctx: &mut PreContext<'_>) {}

    fn execute(&mut self) {}

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        let msg = if self.begin {
            ClientMessage::BundleBegin { id: self.id }
        } else {
            ClientMessage::BundleEnd { id: self.id }
        };
        ctx.broadcaster.send_all(msg);
        ctx.respond(&self.base, "bundle");
    }
}
