//! In-process [`KvStore`] for tests and storage-less hosts.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use super::{KvStore, PersistError, PersistResult};

/// Map-backed store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// True with no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> PersistResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| PersistError::Message("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn get_all(&self) -> PersistResult<Vec<(String, Vec<u8>)>> {
        let mut all: Vec<_> = self
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> PersistResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn clear(&mut self) -> PersistResult<()> {
        self.lock()?.clear();
        Ok(())
    }
}
