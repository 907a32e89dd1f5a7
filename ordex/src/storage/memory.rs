//! In-memory backing store.
//!
//! Transactions are supported with an undo journal: the first write to a key
//! inside a transaction records the key's prior value, and rollback restores
//! every recorded value.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::storage::io::{BackingStore, StoreError};

/// A hash-map backed store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<Vec<u8>, Vec<u8>>,
    /// Prior values of keys written in the open transaction.
    journal: Option<HashMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All stored keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.values.keys().map(Vec::as_slice)
    }

    /// Whether a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    fn remember(&mut self, key: &[u8]) {
        if let Some(journal) = self.journal.as_mut()
            && let Entry::Vacant(slot) = journal.entry(key.to_vec())
        {
            slot.insert(self.values.get(key).cloned());
        }
    }
}

impl BackingStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.values.contains_key(key))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.remember(key);
        self.values.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.remember(key);
        self.values.remove(key);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.journal.is_some() {
            return Err(StoreError::Transaction(
                "transaction already in progress".to_string(),
            ));
        }
        self.journal = Some(HashMap::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.journal = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let Some(journal) = self.journal.take() else {
            return Ok(());
        };
        for (key, prior) in journal {
            match prior {
                Some(value) => {
                    self.values.insert(key, value);
                }
                None => {
                    self.values.remove(&key);
                }
            }
        }
        Ok(())
    }
}
