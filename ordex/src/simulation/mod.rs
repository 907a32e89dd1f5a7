//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module provides tools for testing the engine with:
//! - In-memory storage with fault injection
//! - Reproducible random operations
//! - Invariant checking against a model of committed records
//!
//! # Design Principles
//!
//! 1. All I/O goes through [`BackingStore`](crate::storage::io::BackingStore) and can be simulated
//! 2. All randomness is seeded for reproducibility
//! 3. Faults can be injected at any store call
//! 4. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```
//! use ordex::simulation::{FaultConfig, Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_fault_config(FaultConfig {
//!     read_error_rate: 0.01,
//!     write_error_rate: 0.01,
//!     corruption_rate: 0.0,
//! });
//!
//! let mut sim = Simulator::new(config);
//! let result = sim.run(100);
//!
//! assert!(result.passed());
//! ```

mod invariants;
mod simulator;
mod storage;

pub use invariants::{ExpectedRecord, InvariantChecker, InvariantViolation, Operation, OperationHistory};
pub use simulator::{SimulationResult, Simulator, SimulatorConfig};
pub use storage::{FaultConfig, SimulatedStore, SimulatedStoreStats};
