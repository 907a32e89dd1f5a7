//! Main simulator harness for deterministic simulation testing.
//!
//! The simulator opens a [`Database`] on a [`SimulatedStore`] and drives a
//! seeded mix of instance puts and deletes against one file with an ordered
//! and an unordered field. Each operation runs in its own transaction; when
//! an injected fault aborts it, the transaction is backed out and the model
//! is left unchanged. Invariants are checked with faults switched off.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::storage::{Database, DatabaseError, DatabaseSpec, FileSpec, IndexValues};

use super::invariants::{ExpectedRecord, InvariantChecker, InvariantViolation, OperationHistory};
use super::storage::{FaultConfig, SimulatedStore, SimulatedStoreStats};

pub(super) const FILE: &str = "items";
pub(super) const TAG_FIELD: &str = "tag";
pub(super) const GROUP_FIELD: &str = "group";

/// Configuration for the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fault injection configuration.
    pub fault_config: FaultConfig,
    pub engine: EngineConfig,
    /// Number of distinct ordered-field values.
    pub tag_count: usize,
    /// Number of distinct unordered-field values.
    pub group_count: usize,
    /// Probability that a step deletes rather than puts (0.0 - 1.0).
    pub delete_rate: f64,
    /// Check invariants after every this many operations.
    pub check_interval: usize,
}

impl SimulatorConfig {
    /// Create a config with small segments and a narrow tree, so that a
    /// short run crosses segment boundaries and splits nodes.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::no_faults(),
            engine: EngineConfig::smallest(),
            tag_count: 40,
            group_count: 5,
            delete_rate: 0.35,
            check_interval: 1,
        }
    }

    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    #[must_use]
    pub const fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub const fn with_delete_rate(mut self, rate: f64) -> Self {
        self.delete_rate = rate;
        self
    }

    #[must_use]
    pub const fn with_check_interval(mut self, interval: usize) -> Self {
        self.check_interval = interval;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub seed: u64,
    pub operations: u64,
    /// Operations that committed.
    pub committed: u64,
    /// Operations backed out after an injected fault.
    pub backed_out: u64,
    /// Records held at the end of the run.
    pub final_records: usize,
    pub invariant_violations: Vec<InvariantViolation>,
    pub store_stats: SimulatedStoreStats,
    /// Set when the run could not continue.
    pub error: Option<String>,
}

impl SimulationResult {
    /// Check if the simulation completed with no invariant violations.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.error.is_none() && self.invariant_violations.is_empty()
    }
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    history: OperationHistory,
    checker: InvariantChecker,
    committed: u64,
    backed_out: u64,
    next_value: u64,
}

impl Simulator {
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            history: OperationHistory::new(),
            checker: InvariantChecker::new(),
            committed: 0,
            backed_out: 0,
            next_value: 0,
        }
    }

    /// The file layout every simulation uses.
    #[must_use]
    pub fn spec() -> DatabaseSpec {
        DatabaseSpec::new().file(
            FileSpec::new(FILE, "item")
                .ordered(TAG_FIELD)
                .unordered(GROUP_FIELD),
        )
    }

    /// Run `operation_count` operations against a fresh database.
    pub fn run(&mut self, operation_count: usize) -> SimulationResult {
        let store = SimulatedStore::new(self.config.seed);
        let mut db = match Database::open(store, &Self::spec(), self.config.engine) {
            Ok(db) => db,
            Err(e) => return self.result(None, Some(format!("failed to open database: {e}"))),
        };
        db.store().set_fault_config(self.config.fault_config);

        for step in 0..operation_count {
            if let Err(e) = self.step(&mut db) {
                return self.result(Some(&db), Some(format!("step {step} failed: {e}")));
            }
            let due = self.config.check_interval > 0 && (step + 1) % self.config.check_interval == 0;
            if due || step + 1 == operation_count {
                self.check(&db);
            }
        }
        self.result(Some(&db), None)
    }

    fn step(&mut self, db: &mut Database<SimulatedStore>) -> Result<(), DatabaseError> {
        let delete = !self.history.expected().is_empty() && self.rng.random::<f64>() < self.config.delete_rate;
        if delete {
            let index = self.rng.random_range(0..self.history.expected().len());
            let Some((&record, expected)) = self.history.expected().iter().nth(index) else {
                return Ok(());
            };
            let expected = expected.clone();
            let outcome = Self::transact(db, |db| {
                db.delete_instance(FILE, record, &expected.value, &index_values(&expected))
            });
            let committed = self.finish(db, outcome)?.unwrap_or(false);
            self.history.record_delete(record, committed);
        } else {
            let expected = self.generate();
            let outcome = Self::transact(db, |db| {
                db.put_instance(FILE, &expected.value, &index_values(&expected))
            });
            let record = self.finish(db, outcome)?;
            self.history.record_put(record, expected);
        }
        Ok(())
    }

    /// Run `operation` in a transaction, committing if it succeeds.
    fn transact<T>(
        db: &mut Database<SimulatedStore>,
        operation: impl FnOnce(&mut Database<SimulatedStore>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        db.start_transaction()?;
        let value = operation(db)?;
        db.commit()?;
        Ok(value)
    }

    /// Back out a failed operation with faults switched off.
    fn finish<T>(
        &mut self,
        db: &mut Database<SimulatedStore>,
        outcome: Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        match outcome {
            Ok(value) => {
                self.committed += 1;
                Ok(Some(value))
            }
            Err(e) => {
                debug!(error = %e, "backing out operation");
                let faults = db.store().fault_config();
                db.store().set_fault_config(FaultConfig::no_faults());
                let backout = db.backout();
                db.store().set_fault_config(faults);
                backout?;
                self.backed_out += 1;
                Ok(None)
            }
        }
    }

    fn generate(&mut self) -> ExpectedRecord {
        self.next_value += 1;
        let tag = self.rng.random_range(0..self.config.tag_count.max(1));
        let group = self.rng.random_range(0..self.config.group_count.max(1));
        ExpectedRecord {
            value: format!("value-{}", self.next_value).into_bytes(),
            tag: format!("tag-{tag:03}").into_bytes(),
            group: format!("group-{group}").into_bytes(),
        }
    }

    fn check(&mut self, db: &Database<SimulatedStore>) {
        let faults = db.store().fault_config();
        db.store().set_fault_config(FaultConfig::no_faults());
        self.checker.check(db, &self.history, self.history.len());
        db.store().set_fault_config(faults);
    }

    fn result(&self, db: Option<&Database<SimulatedStore>>, error: Option<String>) -> SimulationResult {
        let violations = self.checker.violations().to_vec();
        if !violations.is_empty() {
            warn!(
                seed = self.config.seed,
                violations = violations.len(),
                "simulation found invariant violations"
            );
        }
        SimulationResult {
            seed: self.config.seed,
            operations: self.history.len() as u64,
            committed: self.committed,
            backed_out: self.backed_out,
            final_records: self.history.expected().len(),
            invariant_violations: violations,
            store_stats: db.map(|db| db.store().stats()).unwrap_or_default(),
            error,
        }
    }

    #[must_use]
    pub const fn history(&self) -> &OperationHistory {
        &self.history
    }

    #[must_use]
    pub const fn checker(&self) -> &InvariantChecker {
        &self.checker
    }
}

fn index_values(expected: &ExpectedRecord) -> IndexValues {
    let mut values = IndexValues::new();
    values.insert(TAG_FIELD.to_string(), vec![expected.tag.clone()]);
    values.insert(GROUP_FIELD.to_string(), vec![expected.group.clone()]);
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_write_faults(rate: f64) -> FaultConfig {
        FaultConfig {
            read_error_rate: rate,
            write_error_rate: rate,
            corruption_rate: 0.0,
        }
    }

    #[test]
    fn test_simulator_basic() {
        let mut simulator = Simulator::new(SimulatorConfig::new(12345));
        let result = simulator.run(200);

        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert_eq!(result.operations, 200);
        assert_eq!(result.committed, 200);
        assert_eq!(result.backed_out, 0);
        assert!(result.final_records > 0);
    }

    #[test]
    fn test_simulator_deterministic() {
        let config = SimulatorConfig::new(777).with_fault_config(read_write_faults(0.01));
        let first = Simulator::new(config).run(150);
        let second = Simulator::new(config).run(150);

        assert_eq!(first.committed, second.committed);
        assert_eq!(first.backed_out, second.backed_out);
        assert_eq!(first.final_records, second.final_records);
        assert_eq!(first.store_stats, second.store_stats);
    }

    #[test]
    fn test_simulator_backs_out_faulted_operations() {
        let config = SimulatorConfig::new(54321)
            .with_fault_config(read_write_faults(0.01))
            .with_check_interval(10);
        let mut simulator = Simulator::new(config);
        let result = simulator.run(300);

        assert!(result.passed(), "{:?}", result.invariant_violations);
        assert!(result.backed_out > 0);
        assert_eq!(result.committed + result.backed_out, 300);
        assert_eq!(simulator.history().len(), 300);
    }

    #[test]
    fn test_simulator_wider_segments() {
        let engine = EngineConfig::new(64, 8).expect("valid config");
        let config = SimulatorConfig::new(9)
            .with_engine(engine)
            .with_delete_rate(0.2)
            .with_check_interval(25);
        let result = Simulator::new(config).run(500);
        assert!(result.passed(), "{:?}", result.invariant_violations);
    }

    #[test]
    #[ignore] // Long running test
    fn test_simulator_stress() {
        for seed in 0..20 {
            let config = SimulatorConfig::new(seed)
                .with_fault_config(read_write_faults(0.005))
                .with_check_interval(50);
            let result = Simulator::new(config).run(5_000);
            assert!(result.passed(), "seed {seed}: {:?}", result.invariant_violations);
        }
    }
}
