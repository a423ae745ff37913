//! Durable key-value storage used by the persistence worker.

/// In-process store.
pub mod memory;
/// SQLite store.
pub mod sqlite;

use crate::{
    serial::{self, PlainHistoryState, SerialError},
    types::ActionId,
};

/// Fixed key of the single "current state" record.
pub const STATE_KEY: &str = "history/current";

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Database error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Stored payload could not be encoded or decoded.
    #[error("encoding: {0}")]
    Serial(#[from] SerialError),
    /// `add` on an existing key.
    #[error("key already exists: {0}")]
    AlreadyExists(String),
    /// Stored state does not hold the action.
    #[error("action {0} is not in the stored state")]
    NotFound(ActionId),
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serial(SerialError::Json(value))
    }
}

/// Result alias for storage calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Transactional key-value medium. Each call is atomic on its own.
pub trait KvStore: Send {
    /// Value under `key`.
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>>;
    /// Every entry, ordered by key.
    fn get_all(&self) -> PersistResult<Vec<(String, Vec<u8>)>>;
    /// Inserts or overwrites.
    fn put(&mut self, key: &str, value: &[u8]) -> PersistResult<()>;
    /// Removes `key`; false when it was absent.
    fn delete(&mut self, key: &str) -> PersistResult<bool>;
    /// Removes every entry.
    fn clear(&mut self) -> PersistResult<()>;

    /// Inserts `value` only when `key` is absent.
    fn add(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        if self.get(key)?.is_some() {
            return Err(PersistError::AlreadyExists(key.to_string()));
        }
        self.put(key, value)
    }

    /// Makes prior writes durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

/// Reads the sentinel state record, if any.
pub fn load_state(store: &dyn KvStore) -> PersistResult<Option<PlainHistoryState>> {
    let Some(payload) = store.get(STATE_KEY)? else {
        return Ok(None);
    };
    Ok(Some(serial::decode_record(&payload)?))
}

/// Overwrites the sentinel state record.
pub fn save_state(store: &mut dyn KvStore, state: &PlainHistoryState) -> PersistResult<()> {
    let payload = serial::encode_record(state)?;
    store.put(STATE_KEY, &payload)
}

/// Removes one action from the stored state.
///
/// Fails with [`PersistError::NotFound`] when the stored state does not hold
/// `id`, which means it has diverged from the caller's log.
pub fn delete_action(store: &mut dyn KvStore, id: ActionId) -> PersistResult<()> {
    let mut state = load_state(store)?.ok_or(PersistError::NotFound(id))?;
    if !state.remove_action(id) {
        return Err(PersistError::NotFound(id));
    }
    save_state(store, &state)
}
