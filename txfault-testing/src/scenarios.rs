use tracing::info;

use txfault_core::{
    Checkpoint, FailureCategory, FaultAction, FaultTarget, HarnessConfig, TimeoutPolicy,
};

use crate::cluster_sim::SimulatedReplicaSet;
use crate::fault_injection::{
    Expectation, Injection, OrchestratorConfig, Scenario, ScenarioOrchestrator, ScenarioReport,
    SuspendedAt, Verdict,
};

pub const LOSE_MAJORITY: &str = "lose-majority";
pub const STEPDOWN: &str = "stepdown";
pub const KILL_MEMBER: &str = "kill-member";
pub const HANG_ON_WRITE: &str = "hang-on-write";
pub const HANG_ON_COMMIT: &str = "hang-on-commit";

/// The named scenarios, bounded ones using the configured Bounded policy.
pub fn create_scenarios(config: &HarnessConfig) -> Vec<Scenario> {
    let bounded = config.bounded_policy.clone();

    vec![
        Scenario {
            name: LOSE_MAJORITY.to_string(),
            description: "Two of three members stopped before the last write".to_string(),
            policy: bounded.clone(),
            inserts: 2,
            update_of: Some(0),
            injections: vec![Injection::new(
                Checkpoint::BeforeOperation(2),
                FaultAction::Stop,
                FaultTarget::Secondaries(2),
            )],
            expectation: Expectation::Failure(vec![FailureCategory::WriteConcernTimeout]),
            retry_budget: 0,
        },
        Scenario {
            name: STEPDOWN.to_string(),
            description: "Primary forced to step down between two writes".to_string(),
            policy: bounded.clone(),
            inserts: 2,
            update_of: Some(0),
            injections: vec![Injection::new(
                Checkpoint::BeforeOperation(1),
                FaultAction::StepDown,
                FaultTarget::Primary,
            )],
            expectation: Expectation::Failure(vec![
                FailureCategory::TopologyChange,
                FailureCategory::Retryable,
            ]),
            retry_budget: 1,
        },
        Scenario {
            name: KILL_MEMBER.to_string(),
            description: "One secondary killed mid-run, majority intact".to_string(),
            policy: bounded,
            inserts: 2,
            update_of: Some(1),
            injections: vec![Injection::new(
                Checkpoint::BeforeOperation(1),
                FaultAction::Kill,
                FaultTarget::Secondaries(1),
            )],
            expectation: Expectation::Committed,
            retry_budget: 0,
        },
        Scenario {
            name: HANG_ON_WRITE.to_string(),
            description: "Primary and one secondary paused between two writes, no timeouts"
                .to_string(),
            policy: TimeoutPolicy::unbounded(),
            inserts: 2,
            update_of: None,
            injections: vec![Injection::new(
                Checkpoint::BeforeOperation(1),
                FaultAction::Pause,
                FaultTarget::PrimaryAndSecondaries(1),
            )],
            expectation: Expectation::Suspended(SuspendedAt::Operation),
            retry_budget: 0,
        },
        Scenario {
            name: HANG_ON_COMMIT.to_string(),
            description: "Both secondaries paused right before commit, no timeouts".to_string(),
            policy: TimeoutPolicy::unbounded(),
            inserts: 3,
            update_of: None,
            injections: vec![Injection::new(
                Checkpoint::BeforeCommit,
                FaultAction::Pause,
                FaultTarget::Secondaries(2),
            )],
            expectation: Expectation::Suspended(SuspendedAt::Commit),
            retry_budget: 0,
        },
    ]
    .into_iter()
    .filter(|s| config.wants_scenario(&s.name))
    .collect()
}

/// Runs the selected scenarios one after another against a fresh
/// three-member simulated replica set.
pub async fn run_scenarios_on_simulator(config: &HarnessConfig) -> Vec<ScenarioReport> {
    let sim = SimulatedReplicaSet::default();
    let orchestrator = ScenarioOrchestrator::new(
        sim.store(),
        sim.control(),
        OrchestratorConfig::from_harness(config),
    );

    let scenarios = create_scenarios(config);
    info!("Running {} scenarios", scenarios.len());
    let reports = orchestrator.run_all(&scenarios).await;

    let stats = sim.stats();
    info!(
        "Simulator: {} transactions, {} commits, {} aborts, {} elections",
        stats.transactions_started, stats.commits, stats.aborts, stats.elections
    );
    reports
}

pub fn print_scenario_summary(reports: &[ScenarioReport]) {
    println!("\n=== SCENARIO SUMMARY ===");
    println!(
        "{:<16} {:<10} {:<28} {:<40} {:<15} {:<10}",
        "Scenario", "Policy", "Expected", "Observed", "Verdict", "Duration"
    );
    println!("{}", "-".repeat(122));

    for report in reports {
        println!(
            "{:<16} {:<10} {:<28} {:<40} {:<15} {:<10}",
            report.scenario,
            report.policy.preset().to_string(),
            report.expected.to_string(),
            report.observed(),
            format!("{:?}", report.verdict),
            format!("{}ms", report.duration.as_millis())
        );
    }

    let failures: Vec<&ScenarioReport> = reports.iter().filter(|r| r.verdict.is_failure()).collect();
    let invalid = reports
        .iter()
        .filter(|r| r.verdict == Verdict::Invalid)
        .count();

    println!("\n=== FAILURE DETAILS ===");
    for report in reports {
        if let Some(failure) = &report.failure {
            println!("{}: {}", report.scenario, failure);
        }
        if let Some(late) = &report.late_outcome {
            println!("{}: resolved late as {}", report.scenario, late.label());
        }
    }

    println!(
        "\n{} passed, {} failed, {} invalid",
        reports.iter().filter(|r| r.passed()).count(),
        failures.len(),
        invalid
    );
}
