//! Simulated in-memory backing store for deterministic testing.
//!
//! This module wraps a [`MemoryStore`] with fault injection:
//! - Read errors
//! - Write and delete errors
//! - Value corruption on read (bit flips)
//!
//! Transaction calls never fault, so a caller can always roll back.

use std::cell::{Cell, RefCell};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{BackingStore, StoreError};
use crate::storage::MemoryStore;

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write or delete error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a corrupted value on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub const fn no_faults() -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: 0.0,
            corruption_rate: 0.0,
        }
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            read_error_rate: 0.001,
            write_error_rate: 0.001,
            corruption_rate: 0.0005,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.02,
            write_error_rate: 0.02,
            corruption_rate: 0.01,
        }
    }
}

/// Statistics about simulated store operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub injected_read_errors: u64,
    pub injected_write_errors: u64,
    pub corrupted_reads: u64,
}

/// In-memory store with seeded fault injection.
///
/// Given the same seed and the same sequence of calls, the same faults are
/// injected. Not thread-safe; simulations run on one thread.
#[derive(Debug)]
pub struct SimulatedStore {
    inner: MemoryStore,
    fault_config: Cell<FaultConfig>,
    rng: RefCell<StdRng>,
    stats: RefCell<SimulatedStoreStats>,
}

impl SimulatedStore {
    /// Create a store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::no_faults())
    }

    /// Create a store with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            inner: MemoryStore::new(),
            fault_config: Cell::new(fault_config),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            stats: RefCell::new(SimulatedStoreStats::default()),
        }
    }

    /// Get a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> SimulatedStoreStats {
        self.stats.borrow().clone()
    }

    /// Reset statistics.
    pub fn reset_stats(&self) {
        *self.stats.borrow_mut() = SimulatedStoreStats::default();
    }

    #[must_use]
    pub fn fault_config(&self) -> FaultConfig {
        self.fault_config.get()
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&self, config: FaultConfig) {
        self.fault_config.set(config);
    }

    /// The underlying store, bypassing fault injection.
    #[must_use]
    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.borrow_mut().random::<f64>() < rate
    }

    /// Flip 1-4 random bits.
    fn corrupt(&self, value: &mut [u8]) {
        if value.is_empty() {
            return;
        }
        let mut rng = self.rng.borrow_mut();
        let flips = rng.random_range(1..=4);
        for _ in 0..flips {
            let at = rng.random_range(0..value.len());
            let bit = rng.random_range(0..8u8);
            value[at] ^= 1 << bit;
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.should_inject_fault(self.fault_config.get().write_error_rate) {
            self.stats.borrow_mut().injected_write_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }
        Ok(())
    }
}

impl BackingStore for SimulatedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.stats.borrow_mut().reads += 1;
        let config = self.fault_config.get();
        if self.should_inject_fault(config.read_error_rate) {
            self.stats.borrow_mut().injected_read_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }
        let mut value = self.inner.get(key)?;
        if let Some(bytes) = value.as_mut()
            && self.should_inject_fault(config.corruption_rate)
        {
            self.stats.borrow_mut().corrupted_reads += 1;
            self.corrupt(bytes);
        }
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.stats.borrow_mut().writes += 1;
        self.check_write()?;
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.stats.borrow_mut().deletes += 1;
        self.check_write()?;
        self.inner.delete(key)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_behaves_like_memory() {
        let mut store = SimulatedStore::new(7);
        store.set(b"k", b"v").expect("set");
        assert_eq!(store.get(b"k").expect("get"), Some(b"v".to_vec()));
        store.delete(b"k").expect("delete");
        assert!(!store.contains(b"k").expect("contains"));
        let stats = store.stats();
        assert_eq!((stats.reads, stats.writes, stats.deletes), (2, 1, 1));
        assert_eq!(stats.injected_read_errors + stats.injected_write_errors, 0);
    }

    #[test]
    fn test_faults_are_deterministic_per_seed() {
        let run = |seed| {
            let mut store = SimulatedStore::with_config(seed, FaultConfig::high_faults());
            let mut outcomes = Vec::new();
            for i in 0u32..500 {
                outcomes.push(store.set(&i.to_be_bytes(), b"value").is_ok());
                outcomes.push(store.get(&i.to_be_bytes()).is_ok());
            }
            (outcomes, store.stats())
        };
        let (first, stats) = run(42);
        let (second, _) = run(42);
        assert_eq!(first, second);
        assert!(stats.injected_write_errors > 0);
        assert!(stats.injected_read_errors > 0);
    }

    #[test]
    fn test_corruption_flips_bits() {
        let mut store = SimulatedStore::new(3);
        store.set(b"k", &[0u8; 32]).expect("set");
        store.set_fault_config(FaultConfig {
            corruption_rate: 1.0,
            ..FaultConfig::no_faults()
        });
        let value = store.get(b"k").expect("get").expect("present");
        assert_ne!(value, vec![0u8; 32]);
        assert_eq!(store.inner().get(b"k").expect("get"), Some(vec![0u8; 32]));
        assert_eq!(store.stats().corrupted_reads, 1);
    }

    #[test]
    fn test_rollback_never_faults() {
        let mut store = SimulatedStore::new(1);
        store.begin().expect("begin");
        store.set(b"k", b"v").expect("set");
        store.set_fault_config(FaultConfig {
            read_error_rate: 1.0,
            write_error_rate: 1.0,
            corruption_rate: 0.0,
        });
        assert!(store.set(b"j", b"v").is_err());
        store.rollback().expect("rollback");
        assert_eq!(store.inner().get(b"k").expect("get"), None);
    }
}
