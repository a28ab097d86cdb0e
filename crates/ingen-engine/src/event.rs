//! Three-phase graph-edit events.
//!
//! Every mutation of the live graph is an [`Event`] moving through three
//! phases on three different threads:
//!
//! 1. `pre_process` — non-realtime, under the store write lock:
//!    validates, mutates the model, allocates buffers and blocks,
//!    recompiles affected graphs, and stashes the prepared handles in
//!    the event.
//! 2. `execute` — on the audio thread between cycles: installs the
//!    prepared handles with pointer swaps. Skipped when pre-processing
//!    recorded an error.
//! 3. `post_process` — non-realtime again, strictly after the audio
//!    thread has published a cycle past the execute: responds to the
//!    client, broadcasts, and releases everything that was replaced.
//!
//! Objects displaced by `execute` (old compiled graphs, removed blocks,
//! superseded source lists) ride inside the event to `post_process`,
//! which is what gives the audio thread wait-free reclamation.

use ingen_api::{ClientMessage, Status};

use crate::broadcaster::{Broadcaster, ClientId};
use crate::buffer_factory::BufferFactory;
use crate::store::Store;
use crate::undo::{UndoMode, UndoStack};

/// State shared by every event kind.
#[derive(Debug)]
pub struct EventBase {
    /// The client that issued the request, if any.
    pub client: Option<ClientId>,
    /// Client-assigned request id, echoed in the response.
    pub request_id: i32,
    /// Outcome, set during pre-processing (or execution).
    pub status: Status,
    /// Cycle counter value when the event executed; `None` for events
    /// that never crossed the audio thread (no reclamation fence).
    pub executed_cycle: Option<u64>,
}

impl EventBase {
    /// A fresh base in the `Success` state.
    pub fn new(client: Option<ClientId>, request_id: i32) -> Self {
        Self {
            client,
            request_id,
            status: Status::Success,
            executed_cycle: None,
        }
    }

    /// Records the first error; later errors don't overwrite it.
    pub fn set_error(&mut self, status: Status) {
        if self.status.is_ok() {
            self.status = status;
        }
    }

    /// True if no error has been recorded.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Context for the non-realtime validation/preparation phase.
pub struct PreContext<'a> {
    /// The entity tree, write-locked for this event.
    pub store: &'a mut Store,
    /// The buffer pool.
    pub factory: &'a BufferFactory,
    /// Undo/redo journal.
    pub undo: &'a mut UndoStack,
    /// Whether this event is a normal request, an undo, or a redo
    /// (routes inverse-operation recording).
    pub undo_mode: UndoMode,
    /// Engine sample rate.
    pub sample_rate: u32,
    /// Dump compiled graphs after each compile.
    pub trace: bool,
    /// Source for port broadcast cookies.
    pub next_cookie: &'a mut dyn FnMut() -> u64,
}

/// Context for the non-realtime completion phase.
pub struct PostContext<'a> {
    /// Client registry and notification fan-out.
    pub broadcaster: &'a Broadcaster,
    /// The buffer pool, for recycling released buffers.
    pub factory: &'a BufferFactory,
}

impl PostContext<'_> {
    /// Sends the response for `base`, if a client is waiting.
    pub fn respond(&self, base: &EventBase, subject: impl Into<String>) {
        if let Some(client) = base.client {
            self.broadcaster.send_to(
                client,
                ClientMessage::Response {
                    id: base.request_id,
                    status: base.status,
                    subject: subject.into(),
                },
            );
        }
    }
}

/// A graph-edit event.
pub trait Event: Send {
    /// Shared header.
    fn base(&self) -> &EventBase;

    /// Shared header, mutably.
    fn base_mut(&mut self) -> &mut EventBase;

    /// Phase 1: validate against the model and prepare handles.
    fn pre_process(&mut self, ctx: &mut PreContext<'_>);

    /// Phase 2: install prepared handles (audio thread, between
    /// cycles). Only called when pre-processing succeeded.
    fn execute(&mut self);

    /// Phase 3: respond, broadcast, release.
    fn post_process(&mut self, ctx: &mut PostContext<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let mut base = EventBase::new(None, 7);
        assert!(base.is_ok());
        base.set_error(Status::NotFound);
        base.set_error(Status::Exists);
        assert_eq!(base.status, Status::NotFound);
    }
}
