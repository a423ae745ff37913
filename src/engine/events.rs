//! History event payloads.

use crate::{
    action::Action,
    types::{ActionId, ToolTag},
};

/// Events broadcast by [`super::history::HistoryEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    /// Startup finished, with or without stored history.
    HistoryReady {
        /// True when stored actions were loaded.
        has_history: bool,
        /// Undo availability after hydration.
        can_undo: bool,
        /// Redo availability after hydration.
        can_redo: bool,
    },
    /// An action was committed.
    Draw {
        /// Assigned id.
        id: ActionId,
        /// Committed action.
        action: Action,
    },
    /// One action was undone.
    Undo {
        /// Tool of the undone action.
        tool: Option<ToolTag>,
        /// Whether another undo is possible.
        can_undo: bool,
    },
    /// One action was redone.
    Redo {
        /// Tool of the redone action.
        tool: ToolTag,
        /// Whether another redo is possible.
        can_redo: bool,
    },
    /// Undo was requested at the empty canvas.
    UndoUnavailable,
    /// Redo was requested with no redo stack.
    RedoUnavailable,
    /// An arbitrary entry was deleted.
    HistoryDeleted {
        /// Deleted id.
        action_id: ActionId,
        /// Actions left in the log.
        remaining_actions: usize,
    },
    /// History was cleared.
    Clear,
    /// Repeated persistence failures; history may not be saved.
    PersistenceDegraded {
        /// Consecutive failures so far.
        failures: u32,
    },
    /// The worker wrote a batch of saves.
    BatchFlushed {
        /// Coalesced saves in the batch.
        count: usize,
    },
}
