//! Seeded simulation runs across several seeds and engine settings.

use crate::config::EngineConfig;
use crate::simulation::{FaultConfig, Simulator, SimulatorConfig};

const FAULTS: FaultConfig = FaultConfig {
    read_error_rate: 0.005,
    write_error_rate: 0.005,
    corruption_rate: 0.0,
};

#[test]
fn test_simulation_seeds_pass() {
    for seed in [1, 2, 3, 4] {
        let config = SimulatorConfig::new(seed)
            .with_fault_config(FAULTS)
            .with_check_interval(20);
        let result = Simulator::new(config).run(400);
        assert!(result.passed(), "seed {seed}: {:?} {:?}", result.error, result.invariant_violations);
        assert_eq!(result.committed + result.backed_out, 400);
    }
}

#[test]
fn test_simulation_delete_heavy() {
    let config = SimulatorConfig::new(17)
        .with_engine(EngineConfig::new(16, 5).expect("valid config"))
        .with_delete_rate(0.6)
        .with_fault_config(FAULTS)
        .with_check_interval(5);
    let mut simulator = Simulator::new(config);
    let result = simulator.run(400);
    assert!(result.passed(), "{:?} {:?}", result.error, result.invariant_violations);
    assert_eq!(result.final_records, simulator.history().expected().len());
    assert!(!simulator.checker().has_violations());
}
