//! # txfault Core
//!
//! Building blocks for a fault-injection harness that drives multi-statement
//! transactions against a replicated store under explicit timeout policies.
//!
//! ## Components
//!
//! - **TimeoutPolicy**: operation, write-concern, commit and socket timeouts,
//!   each either bounded or explicitly unbounded, plus the Bounded and
//!   Unbounded presets
//! - **Classifier**: pure mapping from a raw engine failure to a failure
//!   category and a recommended recovery action
//! - **Store Interface**: the transaction surface the executor drives
//! - **Fault Control Interface**: stop, kill, pause, partition, restore and
//!   step down replica members, and read topology snapshots
//! - **Configuration**: environment-driven overrides for the Bounded preset
//!
//! ## Classifying a failure
//!
//! ```rust
//! use txfault_core::{classify, FailureCategory, RawFailure};
//!
//! let raw = RawFailure::coded(64, "WriteConcernFailed", "waiting for replication timed out");
//! assert_eq!(classify(&raw).category, FailureCategory::WriteConcernTimeout);
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod fault;
pub mod policy;
pub mod store;
pub mod types;

pub use classifier::{
    classify, ClassifiedFailure, FailureCategory, FailureReport, RecommendedAction,
};
pub use config::HarnessConfig;
pub use error::*;
pub use fault::{FaultAction, FaultControl, FaultTarget};
pub use policy::{PolicyPreset, Timeout, TimeoutPolicy};
pub use store::{
    ReadConcern, StoreTransaction, TransactionOptions, TransactionalStore, WriteAck, WriteConcern,
};
pub use types::*;
