//! # txfault Executor
//!
//! Runs one multi-statement transaction under an explicit
//! [`TimeoutPolicy`](txfault_core::TimeoutPolicy), yielding at checkpoints so
//! faults can be injected at a reproducible point, and reports exactly one
//! [`RunOutcome`](txfault_core::RunOutcome).
//!
//! ## Components
//!
//! - **TransactionExecutor**: begin, ordered writes, commit, single abort on
//!   failure, progress published on a watch channel
//! - **CheckpointHook**: rendezvous called before each operation, before
//!   commit and alongside the outstanding commit
//! - **Watchdog**: external wall-clock budget that turns an unresolved run
//!   into `TimedOut` or `StillPending` without cancelling it

pub mod checkpoint;
pub mod executor;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use checkpoint::{countdown, CheckpointHook, NoopHook, RecordingHook};
pub use executor::TransactionExecutor;
pub use watchdog::{run_with_watchdog, OrphanedRun, WatchdogOutcome};
