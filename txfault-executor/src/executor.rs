//! # Transaction Executor
//!
//! Runs an [`OperationSpec`] as one transaction under a [`TimeoutPolicy`]
//! and reports exactly one [`RunOutcome`].
//!
//! The executor forwards every timeout to the store and never adds a
//! ceiling of its own: a run under an unbounded policy may wait forever,
//! and only an external watchdog (see [`crate::watchdog`]) decides to stop
//! looking at it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use txfault_core::{
    AbortedRun, Checkpoint, CommitStats, OperationKind, OperationSpec, RawFailure, RunOutcome,
    RunStage, StoreTransaction, TimeoutPolicy, TransactionOptions, TransactionalStore,
};

use crate::checkpoint::CheckpointHook;

/// Drives one transaction at a time against a store.
pub struct TransactionExecutor {
    store: Arc<dyn TransactionalStore>,
    stage_tx: watch::Sender<RunStage>,
}

impl TransactionExecutor {
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        let (stage_tx, _) = watch::channel(RunStage::Starting);
        Self { store, stage_tx }
    }

    /// Live view of the stage the current run is in.
    pub fn progress(&self) -> watch::Receiver<RunStage> {
        self.stage_tx.subscribe()
    }

    fn enter(&self, stage: RunStage) {
        self.stage_tx.send_replace(stage);
    }

    async fn checkpoint(&self, hook: &dyn CheckpointHook, checkpoint: Checkpoint) {
        self.enter(RunStage::Checkpoint(checkpoint));
        hook.on_checkpoint(checkpoint).await;
    }

    /// Executes `spec` under `policy`. The policy and spec are owned by the
    /// run for its whole duration.
    pub async fn run(
        &self,
        policy: TimeoutPolicy,
        spec: OperationSpec,
        hook: &dyn CheckpointHook,
    ) -> RunOutcome {
        let started = Instant::now();
        self.enter(RunStage::Starting);
        info!(
            "Starting transaction run {} ({} ops on {}) with policy {}",
            spec.run_id,
            spec.len(),
            spec.collection,
            policy
        );

        let options = TransactionOptions::from_policy(&policy);
        let mut txn = match self.store.begin(&spec.collection, options).await {
            Ok(txn) => txn,
            Err(failure) => {
                warn!("Run {} could not start a transaction: {}", spec.run_id, failure);
                self.enter(RunStage::Finished);
                return RunOutcome::AbortedWithError(AbortedRun {
                    failure,
                    stage: RunStage::Starting,
                    abort_failure: None,
                });
            }
        };

        let mut stats = CommitStats {
            operations: spec.len(),
            ..Default::default()
        };

        for (index, operation) in spec.operations.iter().enumerate() {
            self.checkpoint(hook, Checkpoint::BeforeOperation(index)).await;
            self.enter(RunStage::Operation(index));
            debug!("Run {}: issuing {} #{}", spec.run_id, operation.kind(), index);

            match txn.execute(operation, policy.operation_timeout()).await {
                Ok(ack) => match operation.kind() {
                    OperationKind::Insert => stats.inserted += ack.inserted,
                    OperationKind::Update => stats.updated += ack.modified,
                },
                Err(failure) => {
                    return self
                        .fail(txn.as_mut(), &spec, failure, RunStage::Operation(index))
                        .await;
                }
            }
        }

        self.checkpoint(hook, Checkpoint::BeforeCommit).await;
        self.enter(RunStage::Committing);
        debug!("Run {}: committing", spec.run_id);

        // The during-commit hook runs alongside the commit; the latency is
        // taken when the store answers, not when the hook returns.
        let commit_started = Instant::now();
        let commit = async {
            let result = txn.commit().await;
            (result, commit_started.elapsed())
        };
        let ((result, commit_latency), ()) =
            tokio::join!(commit, hook.on_checkpoint(Checkpoint::DuringCommit));

        match result {
            Ok(()) => {
                stats.commit_latency = commit_latency;
                stats.elapsed = started.elapsed();
                self.enter(RunStage::Finished);
                info!(
                    "Run {} committed: {} inserted, {} updated, commit took {:?}",
                    spec.run_id, stats.inserted, stats.updated, stats.commit_latency
                );
                RunOutcome::Committed(stats)
            }
            Err(failure) => {
                self.fail(txn.as_mut(), &spec, failure, RunStage::Committing)
                    .await
            }
        }
    }

    // One abort attempt; its own failure is logged and recorded, never
    // substituted for the original failure.
    async fn fail(
        &self,
        txn: &mut dyn StoreTransaction,
        spec: &OperationSpec,
        failure: RawFailure,
        stage: RunStage,
    ) -> RunOutcome {
        warn!("Run {} failed during {}: {}", spec.run_id, stage, failure);
        self.enter(RunStage::Aborting);

        let abort_failure = match txn.abort().await {
            Ok(()) => None,
            Err(abort_failure) => {
                warn!(
                    "Run {}: abort after failure also failed: {}",
                    spec.run_id, abort_failure
                );
                Some(abort_failure)
            }
        };

        self.enter(RunStage::Finished);
        RunOutcome::AbortedWithError(AbortedRun {
            failure,
            stage,
            abort_failure,
        })
    }
}
