//! The message-oriented client interface.
//!
//! Clients speak a bi-directional stream of tagged [`ClientMessage`]s.
//! Every request carries a client-assigned id; every mutation is answered
//! by a `Response` carrying a [`Status`].

use std::fmt;

use crate::atom::{Atom, Properties};
use crate::path::Path;

/// Outcome of a request, reported in `Response` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The request was applied.
    Success,
    /// The subject does not exist.
    NotFound,
    /// The target path is already taken.
    Exists,
    /// The request is malformed or structurally invalid.
    BadRequest,
    /// Port types are incompatible.
    TypeMismatch,
    /// A move would change the entity's parent.
    ParentDiffers,
    /// The connection closes a delay-free cycle.
    Feedback,
    /// A pool or queue limit was hit.
    OutOfResources,
    /// Unexpected engine failure.
    Internal,
}

impl Status {
    /// Returns true for `Success`.
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::NotFound => "not found",
            Status::Exists => "exists",
            Status::BadRequest => "bad request",
            Status::TypeMismatch => "type mismatch",
            Status::ParentDiffers => "parent differs",
            Status::Feedback => "feedback",
            Status::OutOfResources => "out of resources",
            Status::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// A message on the client stream, in either direction.
///
/// Requests carry a client-assigned `id` echoed back in the matching
/// `Response`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Describe (or create) an entity with the given properties.
    Put {
        /// Entity path.
        path: Path,
        /// Entity properties.
        properties: Properties,
    },
    /// Patch an entity's properties: remove, then add.
    Delta {
        /// Entity path.
        path: Path,
        /// Properties to remove.
        remove: Properties,
        /// Properties to add.
        add: Properties,
    },
    /// Connect an output port to an input port.
    Connect {
        /// Output (source) port path.
        tail: Path,
        /// Input (destination) port path.
        head: Path,
    },
    /// Remove the arc between two ports.
    Disconnect {
        /// Output (source) port path.
        tail: Path,
        /// Input (destination) port path.
        head: Path,
    },
    /// Remove every arc touching `path` within `parent`.
    DisconnectAll {
        /// Parent graph path.
        parent: Path,
        /// Block or port path.
        path: Path,
    },
    /// Rename an entity within its parent.
    Move {
        /// Current path.
        from: Path,
        /// New path (same parent).
        to: Path,
    },
    /// Duplicate an entity.
    Copy {
        /// Source path.
        from: Path,
        /// Destination path.
        to: Path,
    },
    /// Delete an entity.
    Del {
        /// Entity path.
        path: Path,
    },
    /// Set a single property on an entity.
    SetProperty {
        /// Entity path.
        subject: Path,
        /// Property key (URI).
        key: String,
        /// New value.
        value: Atom,
    },
    /// Request a `Put` describing an entity.
    Get {
        /// Entity path.
        path: Path,
    },
    /// Answer to a request.
    Response {
        /// The client-assigned request id.
        id: i32,
        /// Outcome.
        status: Status,
        /// The request's subject, as a string.
        subject: String,
    },
    /// Out-of-band error report.
    Error {
        /// Human-readable message.
        message: String,
    },
    /// Start of an atomic message group.
    BundleBegin {
        /// Bundle id.
        id: i32,
    },
    /// End of an atomic message group.
    BundleEnd {
        /// Bundle id.
        id: i32,
    },
    /// Undo the most recent undoable operation.
    Undo,
    /// Redo the most recently undone operation.
    Redo,
}
