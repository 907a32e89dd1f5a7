//! Backing store abstraction.
//!
//! The engine persists everything through a flat, unordered point store:
//! get, contains, set and delete by opaque byte key. There is no range scan
//! and no multi-key atomicity beyond whatever a concrete store provides.
//!
//! # Design
//!
//! The trait is a minimal abstraction so the engine can run against:
//! - [`MemoryStore`](super::MemoryStore) for embedded and test use
//! - [`FileStore`](super::FileStore) for a single append-only file
//! - [`SimulatedStore`](crate::simulation::SimulatedStore) for fault injection
//!
//! Transaction calls default to no-ops for stores without such support.

/// Errors that can occur during backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Injected fault for simulation.
    #[error("injected fault: {0}")]
    InjectedFault(String),
    /// Corruption detected.
    #[error("corruption: {0}")]
    Corruption(String),
    /// Transaction call made in the wrong state.
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// A byte-keyed point store.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `get` returns the last value written by `set` for that key
/// - `delete` of an absent key succeeds without effect
/// - no ordering is promised between keys
pub trait BackingStore {
    /// Read the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Check whether a value is stored under `key`.
    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Remove the value stored under `key`.
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Begin a transaction.
    fn begin(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Make the current transaction's writes permanent.
    fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Discard the current transaction's writes.
    fn rollback(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
