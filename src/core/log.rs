use crate::{
    action::{Action, HistoryAction, HistoryState},
    types::{ActionId, EMPTY_CANVAS},
};

/// Rejected pointer moves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// Already at the empty canvas.
    #[error("nothing to undo")]
    NothingToUndo,
    /// No action after the current one.
    #[error("nothing to redo")]
    NothingToRedo,
    /// Pointer names an id that is not in the log.
    #[error("no action with id {0}")]
    MissingAction(ActionId),
}

/// Ordered actions plus the id of the one currently applied.
///
/// Actions are kept in ascending id order. Everything up to and including
/// `current` is the undo stack; everything after it is the redo stack.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    actions: Vec<HistoryAction>,
    current: ActionId,
    highest_issued: ActionId,
}

impl ActionLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log restored from `state`; see [`Self::restore`].
    pub fn from_state(state: HistoryState) -> Self {
        let mut log = Self::new();
        log.restore(state);
        log
    }

    /// Appends `action`, discarding any redo suffix first.
    pub fn append(&mut self, action: Action) -> &HistoryAction {
        let keep = match self.current_pos() {
            Some(pos) => pos + 1,
            None => 0,
        };
        self.actions.truncate(keep);

        let last = self.actions.last().map_or(EMPTY_CANVAS, |a| a.id);
        let id = self.highest_issued.max(last) + 1;
        self.highest_issued = id;
        self.current = id;
        self.actions.push(HistoryAction { id, action });
        &self.actions[self.actions.len() - 1]
    }

    /// Steps the pointer back by one action.
    ///
    /// `Ok(None)` means the log is now at the empty canvas.
    pub fn move_back(&mut self) -> Result<Option<&HistoryAction>, LogError> {
        if self.current == EMPTY_CANVAS {
            return Err(LogError::NothingToUndo);
        }
        let Some(pos) = self.current_pos() else {
            self.current = EMPTY_CANVAS;
            return Ok(None);
        };
        if pos == 0 {
            self.current = EMPTY_CANVAS;
            return Ok(None);
        }
        let prev = &self.actions[pos - 1];
        self.current = prev.id;
        Ok(Some(prev))
    }

    /// Steps the pointer forward by one action and returns it.
    pub fn move_forward(&mut self) -> Result<&HistoryAction, LogError> {
        let next = match self.current_pos() {
            Some(pos) => pos + 1,
            None if self.current == EMPTY_CANVAS => 0,
            None => return Err(LogError::MissingAction(self.current)),
        };
        let Some(action) = self.actions.get(next) else {
            return Err(LogError::NothingToRedo);
        };
        self.current = action.id;
        Ok(action)
    }

    /// Removes the action with `id`. Returns false when it is not present.
    pub fn remove_by_id(&mut self, id: ActionId) -> bool {
        let Ok(pos) = self.position_of(id) else {
            return false;
        };
        self.actions.remove(pos);

        if self.current == id {
            let prev = pos.checked_sub(1).map(|p| self.actions[p].id);
            let next = self.actions.get(pos).map(|a| a.id);
            self.current = current_after_removal(prev, next);
        }
        true
    }

    /// Copy of the actions and pointer.
    pub fn snapshot(&self) -> HistoryState {
        HistoryState {
            actions: self.actions.clone(),
            current_index: self.current,
        }
    }

    /// Replaces the log wholesale.
    ///
    /// Actions are sorted by id and duplicate ids dropped. A `current_index`
    /// that names no surviving action is moved to the nearest preceding id.
    pub fn restore(&mut self, state: HistoryState) {
        let HistoryState {
            mut actions,
            current_index,
        } = state;
        actions.sort_by_key(|a| a.id);
        actions.dedup_by_key(|a| a.id);
        actions.retain(|a| a.id != EMPTY_CANVAS);

        self.current = if current_index == EMPTY_CANVAS {
            EMPTY_CANVAS
        } else {
            actions
                .iter()
                .rev()
                .find(|a| a.id <= current_index)
                .map_or(EMPTY_CANVAS, |a| a.id)
        };
        if let Some(last) = actions.last() {
            self.highest_issued = self.highest_issued.max(last.id);
        }
        self.actions = actions;
    }

    /// Drops every action. Ids already issued stay retired.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.current = EMPTY_CANVAS;
    }

    /// Applied id, or [`EMPTY_CANVAS`].
    pub fn current_index(&self) -> ActionId {
        self.current
    }

    /// Applied action, if any.
    pub fn current_action(&self) -> Option<&HistoryAction> {
        self.current_pos().map(|pos| &self.actions[pos])
    }

    /// Action with `id`.
    pub fn get(&self, id: ActionId) -> Option<&HistoryAction> {
        self.position_of(id).ok().map(|pos| &self.actions[pos])
    }

    /// Actions in id order.
    pub fn actions(&self) -> &[HistoryAction] {
        &self.actions
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True with no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Largest id handed out this session, including discarded ones.
    pub fn highest_issued(&self) -> ActionId {
        self.highest_issued
    }

    /// True unless at the empty canvas.
    pub fn can_undo(&self) -> bool {
        self.current != EMPTY_CANVAS
    }

    /// True when an action follows the pointer.
    pub fn can_redo(&self) -> bool {
        match self.current_pos() {
            Some(pos) => pos + 1 < self.actions.len(),
            None => self.current == EMPTY_CANVAS && !self.actions.is_empty(),
        }
    }

    /// True when `current_index` is empty or names a stored action.
    pub fn is_consistent(&self) -> bool {
        self.current == EMPTY_CANVAS || self.current_pos().is_some()
    }

    /// Actions that must be replayed to rebuild the applied state.
    ///
    /// Starts at the last `Clear` at or before the pointer, since a clear
    /// resets every layer.
    pub fn replay_range(&self) -> &[HistoryAction] {
        let Some(end) = self.current_pos() else {
            return &[];
        };
        let start = self.actions[..=end]
            .iter()
            .rposition(|a| matches!(a.action, Action::Clear))
            .unwrap_or(0);
        &self.actions[start..=end]
    }

    fn current_pos(&self) -> Option<usize> {
        if self.current == EMPTY_CANVAS {
            return None;
        }
        self.position_of(self.current).ok()
    }

    fn position_of(&self, id: ActionId) -> Result<usize, usize> {
        self.actions.binary_search_by_key(&id, |a| a.id)
    }
}

/// Pointer to use after the current action is removed: the nearest
/// preceding survivor, else the nearest following one, else empty.
pub fn current_after_removal(prev: Option<ActionId>, next: Option<ActionId>) -> ActionId {
    prev.or(next).unwrap_or(EMPTY_CANVAS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(n: usize) -> ActionLog {
        let mut log = ActionLog::new();
        for _ in 0..n {
            log.append(Action::Clear);
        }
        log
    }

    #[test]
    fn replay_range_starts_at_last_clear() {
        use crate::action::ImportAction;

        let mut log = ActionLog::new();
        log.append(Action::Import(ImportAction::default()));
        log.append(Action::Clear);
        log.append(Action::Import(ImportAction::default()));
        log.append(Action::Import(ImportAction::default()));

        let ids: Vec<_> = log.replay_range().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        log.move_back().unwrap();
        log.move_back().unwrap();
        log.move_back().unwrap();
        let ids: Vec<_> = log.replay_range().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn removing_first_current_moves_forward() {
        let mut log = log_with(3);
        log.move_back().unwrap();
        log.move_back().unwrap();
        assert_eq!(log.current_index(), 1);

        assert!(log.remove_by_id(1));
        assert_eq!(log.current_index(), 2);
    }

    #[test]
    fn removing_last_remaining_resets_to_empty() {
        let mut log = log_with(1);
        assert!(log.remove_by_id(1));
        assert_eq!(log.current_index(), EMPTY_CANVAS);
        assert!(!log.can_undo());
        assert!(!log.can_redo());
    }

    #[test]
    fn restore_repairs_dangling_current() {
        let mut log = log_with(4);
        let mut state = log.snapshot();
        state.actions.retain(|a| a.id != 3);
        state.current_index = 3;

        log.restore(state);
        assert_eq!(log.current_index(), 2);
        assert!(log.is_consistent());
    }

    #[test]
    fn clear_keeps_high_water_mark() {
        let mut log = log_with(5);
        log.clear();
        let id = log.append(Action::Clear).id;
        assert_eq!(id, 6);
    }
}
