//! External wall-clock watchdog.
//!
//! The executor never cancels its own waits. The watchdog sits above it,
//! stops *looking* at a run once its budget is spent and hands the still
//! running task back as an [`OrphanedRun`]. Under a real driver the
//! in-flight network call may stay blocked after that point; the orphan
//! can only be drained once the fault is lifted, or dropped from the
//! runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use txfault_core::{
    HarnessError, OperationSpec, Result, RunOutcome, RunStage, ScenarioRunId, TimeoutPolicy,
};

use crate::checkpoint::CheckpointHook;
use crate::executor::TransactionExecutor;

/// What the watchdog saw.
#[derive(Debug)]
pub struct WatchdogOutcome {
    pub outcome: RunOutcome,
    /// Set when the run outlived the budget and is still executing
    pub orphan: Option<OrphanedRun>,
}

impl WatchdogOutcome {
    pub fn fired(&self) -> bool {
        self.orphan.is_some()
    }
}

/// A run the watchdog gave up on.
#[derive(Debug)]
pub struct OrphanedRun {
    run_id: ScenarioRunId,
    handle: JoinHandle<RunOutcome>,
}

impl OrphanedRun {
    pub fn run_id(&self) -> &ScenarioRunId {
        &self.run_id
    }

    /// Gives the run up to `budget` to finish on its own, typically after
    /// the injected faults were lifted. Cancels it otherwise.
    pub async fn drain(mut self, budget: Duration) -> Option<RunOutcome> {
        match timeout(budget, &mut self.handle).await {
            Ok(Ok(outcome)) => {
                info!(
                    "Orphaned run {} resolved late as {}",
                    self.run_id,
                    outcome.label()
                );
                Some(outcome)
            }
            Ok(Err(e)) => {
                warn!("Orphaned run {} did not complete: {}", self.run_id, e);
                None
            }
            Err(_) => {
                warn!(
                    "Orphaned run {} still blocked after {:?}, cancelling",
                    self.run_id, budget
                );
                self.handle.abort();
                None
            }
        }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Runs `spec` on a spawned task and waits at most `limit` for it.
///
/// When the budget runs out the outcome is [`RunOutcome::TimedOut`] for a
/// fully bounded policy, which means a bounded run hung, and
/// [`RunOutcome::StillPending`] otherwise. The stage is read from the
/// executor's progress channel, so the executor must not be shared with
/// another concurrent run.
pub async fn run_with_watchdog(
    executor: Arc<TransactionExecutor>,
    policy: TimeoutPolicy,
    spec: OperationSpec,
    hook: Arc<dyn CheckpointHook>,
    limit: Duration,
) -> Result<WatchdogOutcome> {
    let fully_bounded = policy.is_fully_bounded();
    let run_id = spec.run_id.clone();
    let progress = executor.progress();
    let started = Instant::now();

    let mut handle = tokio::spawn(async move { executor.run(policy, spec, hook.as_ref()).await });

    match timeout(limit, &mut handle).await {
        Ok(Ok(outcome)) => Ok(WatchdogOutcome {
            outcome,
            orphan: None,
        }),
        Ok(Err(e)) => Err(HarnessError::internal(format!(
            "run {} task failed: {}",
            run_id, e
        ))),
        Err(_) => {
            let elapsed = started.elapsed();
            let stage: RunStage = *progress.borrow();
            let outcome = if fully_bounded {
                warn!(
                    "Watchdog: bounded run {} hung for {:?} during {}",
                    run_id, elapsed, stage
                );
                RunOutcome::TimedOut { elapsed, stage }
            } else {
                info!(
                    "Watchdog: run {} still pending after {:?} during {}",
                    run_id, elapsed, stage
                );
                RunOutcome::StillPending { elapsed, stage }
            };
            Ok(WatchdogOutcome {
                outcome,
                orphan: Some(OrphanedRun { run_id, handle }),
            })
        }
    }
}
