//! Undo/redo journal.
//!
//! Successful mutations record the operation that reverses them. `Undo`
//! pops the journal and replays the inverse as a nested event, which in
//! turn records into the redo stack; `Redo` mirrors that. Deletions are
//! a journal barrier: reversing one would need a full subtree snapshot,
//! so the history is cleared instead.

use ingen_api::{Atom, Path};

/// How the current event entered the system, which decides where its
/// inverse is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoMode {
    /// A normal client request: record into the undo stack.
    Normal,
    /// Replaying an undo: record into the redo stack.
    Undoing,
    /// Replaying a redo: record into the undo stack.
    Redoing,
}

/// A recorded inverse operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoOp {
    /// Re-add an arc.
    Connect {
        /// Source port path.
        tail: Path,
        /// Destination port path.
        head: Path,
    },
    /// Remove an arc.
    Disconnect {
        /// Source port path.
        tail: Path,
        /// Destination port path.
        head: Path,
    },
    /// Rename back.
    Move {
        /// Current path.
        from: Path,
        /// Original path.
        to: Path,
    },
    /// Restore a property value.
    SetProperty {
        /// Entity path.
        subject: Path,
        /// Property key.
        key: String,
        /// Previous value.
        value: Atom,
    },
    /// Remove a created entity.
    Delete {
        /// Entity path.
        path: Path,
    },
}

/// The undo and redo stacks.
#[derive(Debug, Default)]
pub struct UndoStack {
    undo: Vec<UndoOp>,
    redo: Vec<UndoOp>,
}

impl UndoStack {
    /// An empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the inverse of a successful operation.
    ///
    /// Normal requests push onto the undo stack and invalidate the redo
    /// stack; replayed undos/redos push onto the opposite stack.
    pub fn record(&mut self, mode: UndoMode, op: UndoOp) {
        match mode {
            UndoMode::Normal => {
                self.undo.push(op);
                self.redo.clear();
            }
            UndoMode::Undoing => self.redo.push(op),
            UndoMode::Redoing => self.undo.push(op),
        }
    }

    /// Pops the next operation to undo.
    pub fn pop_undo(&mut self) -> Option<UndoOp> {
        self.undo.pop()
    }

    /// Pops the next operation to redo.
    pub fn pop_redo(&mut self) -> Option<UndoOp> {
        self.redo.pop()
    }

    /// Clears both stacks (history barrier).
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Number of undoable operations.
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Number of redoable operations.
    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}
