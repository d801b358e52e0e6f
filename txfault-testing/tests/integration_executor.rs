//! Executor and watchdog against the simulated replica set.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready};

use txfault_core::{
    classify, Checkpoint, FailureCategory, FaultControl, HarnessError, OperationSpec,
    RecommendedAction, RunOutcome, RunStage, ScenarioRunId, TimeoutPolicy,
};
use txfault_executor::{run_with_watchdog, CheckpointHook, NoopHook, TransactionExecutor};
use txfault_testing::{SimulatedReplicaSet, SimulatorConfig};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Pauses the given members when the run reaches `at`.
struct PauseAt {
    sim: SimulatedReplicaSet,
    at: Checkpoint,
    members: Vec<String>,
}

#[async_trait]
impl CheckpointHook for PauseAt {
    async fn on_checkpoint(&self, checkpoint: Checkpoint) {
        if checkpoint == self.at {
            for member in &self.members {
                self.sim.pause(member).await.unwrap();
            }
        }
    }
}

fn members(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_bounded_run_on_paused_primary_fails_fast() {
    init_logging();
    let sim = SimulatedReplicaSet::default();
    let executor = TransactionExecutor::new(sim.store());
    let hook = PauseAt {
        sim: sim.clone(),
        at: Checkpoint::BeforeOperation(1),
        members: members(&["member-1", "member-2"]),
    };
    let spec = OperationSpec::inserts("orders", ScenarioRunId::new("paused"), 2);

    let outcome = executor.run(TimeoutPolicy::bounded(), spec, &hook).await;

    let aborted = match outcome {
        RunOutcome::AbortedWithError(aborted) => aborted,
        other => panic!("expected abort, got {:?}", other),
    };
    assert_eq!(aborted.stage, RunStage::Operation(1));
    let classified = classify(&aborted.failure);
    assert_eq!(classified.category, FailureCategory::OperationTimeout);
    assert_eq!(classified.recommended_action, RecommendedAction::RetryOperation);
    // The abort could not reach the paused member either; the original
    // failure is still the one reported.
    assert_eq!(aborted.abort_failure.and_then(|f| f.code), Some(89));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_commit_stays_pending_until_majority_returns() {
    init_logging();
    let sim = SimulatedReplicaSet::new(
        SimulatorConfig::default().with_latency(Duration::ZERO, Duration::ZERO),
    );
    let executor = TransactionExecutor::new(sim.store());
    let progress = executor.progress();
    let hook = PauseAt {
        sim: sim.clone(),
        at: Checkpoint::BeforeCommit,
        members: members(&["member-2", "member-3"]),
    };
    let spec = OperationSpec::inserts("orders", ScenarioRunId::new("hang"), 3);

    let mut run = tokio_test::task::spawn(executor.run(TimeoutPolicy::unbounded(), spec, &hook));
    assert_pending!(run.poll());
    assert_eq!(*progress.borrow(), RunStage::Committing);
    assert!(sim.documents("orders").is_empty());

    sim.restore(&sim.member_names()).await.unwrap();
    assert!(run.is_woken());
    let outcome = assert_ready!(run.poll());
    assert!(outcome.is_committed());
    assert_eq!(sim.documents("orders").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_suspends_then_orphan_drains() {
    init_logging();
    let sim = SimulatedReplicaSet::default();
    let executor = Arc::new(TransactionExecutor::new(sim.store()));
    let hook = Arc::new(PauseAt {
        sim: sim.clone(),
        at: Checkpoint::BeforeCommit,
        members: members(&["member-2", "member-3"]),
    });
    let spec = OperationSpec::inserts("orders", ScenarioRunId::new("orphan"), 3);

    let watched = run_with_watchdog(
        executor,
        TimeoutPolicy::unbounded(),
        spec,
        hook,
        Duration::from_secs(30),
    )
    .await
    .unwrap();

    assert!(matches!(
        watched.outcome,
        RunOutcome::StillPending {
            stage: RunStage::Committing,
            ..
        }
    ));
    let orphan = watched.orphan.expect("suspended run is handed back");

    sim.restore(&sim.member_names()).await.unwrap();
    let late = orphan.drain(Duration::from_secs(5)).await;
    assert!(late.map(|o| o.is_committed()).unwrap_or(false));
}

#[tokio::test(start_paused = true)]
async fn test_reused_run_id_hits_uniqueness_constraint() {
    init_logging();
    let sim = SimulatedReplicaSet::default();
    let executor = TransactionExecutor::new(sim.store());
    let run_id = ScenarioRunId::fixed("fixed-run");

    let first = executor
        .run(
            TimeoutPolicy::bounded(),
            OperationSpec::inserts("orders", run_id.clone(), 2),
            &NoopHook,
        )
        .await;
    assert!(first.is_committed());

    let second = executor
        .run(
            TimeoutPolicy::bounded(),
            OperationSpec::inserts("orders", run_id, 2),
            &NoopHook,
        )
        .await;
    let raw = second.raw_failure().expect("duplicate insert fails");
    assert_eq!(raw.code, Some(11000));
    assert_eq!(classify(raw).category, FailureCategory::Unclassified);
    assert_eq!(sim.documents("orders").len(), 2);
}

#[tokio::test]
async fn test_negative_override_fails_before_any_io() {
    let sim = SimulatedReplicaSet::default();

    let result = TimeoutPolicy::bounded_with_overrides(None, None, Some(-250));

    assert!(matches!(result, Err(HarnessError::InvalidPolicy { .. })));
    assert_eq!(sim.stats().transactions_started, 0);
}
