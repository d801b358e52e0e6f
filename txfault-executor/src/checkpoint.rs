//! Checkpoint rendezvous between the executor and whoever drives faults.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use txfault_core::Checkpoint;

/// Called by the executor at every checkpoint, in program order, exactly
/// once each. The executor does not proceed until the call returns, except
/// for [`Checkpoint::DuringCommit`], which runs alongside the outstanding
/// commit.
#[async_trait]
pub trait CheckpointHook: Send + Sync {
    async fn on_checkpoint(&self, checkpoint: Checkpoint);
}

/// Hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl CheckpointHook for NoopHook {
    async fn on_checkpoint(&self, _checkpoint: Checkpoint) {}
}

/// Hook that remembers every checkpoint it saw.
#[derive(Debug, Default)]
pub struct RecordingHook {
    seen: Mutex<Vec<Checkpoint>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<Checkpoint> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl CheckpointHook for RecordingHook {
    async fn on_checkpoint(&self, checkpoint: Checkpoint) {
        self.seen.lock().push(checkpoint);
    }
}

/// Waits `delay`, logging the remaining whole seconds so the pause is
/// visible in the run log.
pub async fn countdown(label: &str, delay: Duration) {
    if delay.is_zero() {
        return;
    }
    let tick = Duration::from_secs(1);
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        info!("{}: proceeding in {:.1}s", label, remaining.as_secs_f64());
        let step = remaining.min(tick);
        sleep(step).await;
        remaining -= step;
    }
}
