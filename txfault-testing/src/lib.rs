pub mod cluster_sim;
pub mod fault_injection;
pub mod scenarios;

pub use cluster_sim::{MemberHealth, SimulatedReplicaSet, SimulatorConfig, SimulatorStats};
pub use fault_injection::{
    Expectation, Injection, OrchestratorConfig, Scenario, ScenarioOrchestrator, ScenarioReport,
    ScenarioState, SuspendedAt, Verdict,
};
pub use scenarios::{create_scenarios, print_scenario_summary, run_scenarios_on_simulator};
