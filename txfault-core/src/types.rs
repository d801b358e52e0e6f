//! # Core Types
//!
//! Values exchanged between the executor, the classifier and the scenario
//! orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Error labels that mark a failure as safe to retry at some level.
pub const RETRYABLE_LABELS: &[&str] = &[
    "TransientTransactionError",
    "RetryableWriteError",
    "UnknownTransactionCommitResult",
];

/// Time-based unique identifier for one scenario run.
///
/// Documents written by a run carry this identifier in their `_id`, so two
/// runs never collide unless a test collides them on purpose.
///
/// # Examples
///
/// ```rust
/// use txfault_core::ScenarioRunId;
///
/// let a = ScenarioRunId::new("kill-member");
/// let b = ScenarioRunId::new("kill-member");
/// assert_ne!(a, b);
/// assert!(a.as_str().starts_with("kill-member-"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioRunId(String);

impl ScenarioRunId {
    pub fn new(scenario: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", scenario, millis, &suffix[..8]))
    }

    /// Reuses a fixed identifier. Only useful to exercise the uniqueness
    /// constraint deliberately.
    pub fn fixed(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenarioRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of write performed by an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Update => write!(f, "update"),
        }
    }
}

/// One write inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Insert a document; the document must carry an `_id`
    Insert { document: Value },
    /// Set fields on the document with the given `_id`
    Update { id: Value, set: Value },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Insert { .. } => OperationKind::Insert,
            Operation::Update { .. } => OperationKind::Update,
        }
    }

    /// The `_id` this operation targets, if any.
    pub fn target_id(&self) -> Option<&Value> {
        match self {
            Operation::Insert { document } => document.get("_id"),
            Operation::Update { id, .. } => Some(id),
        }
    }
}

/// Ordered writes of one scenario run, all applied in a single transaction.
///
/// Payloads are deterministic functions of the run id and the position, so
/// replaying the same spec after an ambiguous commit re-applies the same
/// documents rather than new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub collection: String,
    pub run_id: ScenarioRunId,
    pub operations: Vec<Operation>,
}

impl OperationSpec {
    pub fn new(collection: impl Into<String>, run_id: ScenarioRunId) -> Self {
        Self {
            collection: collection.into(),
            run_id,
            operations: Vec::new(),
        }
    }

    /// `count` inserts with ids `<run_id>-0 .. <run_id>-<count-1>`.
    pub fn inserts(collection: impl Into<String>, run_id: ScenarioRunId, count: usize) -> Self {
        let mut spec = Self::new(collection, run_id);
        for _ in 0..count {
            spec = spec.with_insert();
        }
        spec
    }

    pub fn with_insert(mut self) -> Self {
        let seq = self.operations.len();
        let document = json!({
            "_id": self.document_id(seq),
            "run_id": self.run_id.as_str(),
            "seq": seq,
            "status": "inserted",
        });
        self.operations.push(Operation::Insert { document });
        self
    }

    /// Update of the document inserted at position `target_seq`.
    pub fn with_update(mut self, target_seq: usize) -> Self {
        let id = Value::String(self.document_id(target_seq));
        let set = json!({ "status": "updated", "updated_by_seq": self.operations.len() });
        self.operations.push(Operation::Update { id, set });
        self
    }

    pub fn document_id(&self, seq: usize) -> String {
        format!("{}-{}", self.run_id, seq)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A named pause point where the orchestrator may inject a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Before operation N (zero based) is issued
    BeforeOperation(usize),
    /// After the last operation, before commit is attempted
    BeforeCommit,
    /// After commit has been issued, while its reply is outstanding
    DuringCommit,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::BeforeOperation(n) => write!(f, "before-op-{}", n),
            Checkpoint::BeforeCommit => write!(f, "after-last-op-before-commit"),
            Checkpoint::DuringCommit => write!(f, "during-commit"),
        }
    }
}

/// Where a run currently is, or where it was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Starting,
    /// Waiting on the checkpoint hook, before the step it guards
    Checkpoint(Checkpoint),
    Operation(usize),
    Committing,
    Aborting,
    Finished,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Starting => write!(f, "starting"),
            RunStage::Checkpoint(checkpoint) => write!(f, "checkpoint {}", checkpoint),
            RunStage::Operation(n) => write!(f, "operation {}", n),
            RunStage::Committing => write!(f, "committing"),
            RunStage::Aborting => write!(f, "aborting"),
            RunStage::Finished => write!(f, "finished"),
        }
    }
}

/// A failure exactly as the storage engine reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFailure {
    pub code: Option<i32>,
    pub symbolic_name: Option<String>,
    pub message: String,
    pub retryable_label_present: bool,
    /// Every label attached to the error, retryable or not
    #[serde(default)]
    pub labels: Vec<String>,
}

impl RawFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            symbolic_name: None,
            message: message.into(),
            retryable_label_present: false,
            labels: Vec::new(),
        }
    }

    /// A failure with both a numeric code and its symbolic name.
    pub fn coded(code: i32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_code(code).with_name(name)
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.symbolic_name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if RETRYABLE_LABELS.contains(&label.as_str()) {
            self.retryable_label_present = true;
        }
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = self.symbolic_name.as_deref().unwrap_or("-");
        write!(f, "[code={} name={}] {}", code, name, self.message)?;
        if !self.labels.is_empty() {
            write!(f, " labels={:?}", self.labels)?;
        }
        Ok(())
    }
}

/// Counters for a committed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub operations: usize,
    pub inserted: usize,
    pub updated: usize,
    pub commit_latency: Duration,
    pub elapsed: Duration,
}

/// A run that failed, and what happened to its abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortedRun {
    pub failure: RawFailure,
    pub stage: RunStage,
    /// Set when the single best-effort abort itself failed
    pub abort_failure: Option<RawFailure>,
}

/// Terminal result of one transaction run. Produced exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Committed(CommitStats),
    AbortedWithError(AbortedRun),
    /// A fully bounded run outlived the external watchdog
    TimedOut { elapsed: Duration, stage: RunStage },
    /// A run with an unbounded knob outlived the external watchdog
    StillPending { elapsed: Duration, stage: RunStage },
}

impl RunOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RunOutcome::Committed(_))
    }

    pub fn raw_failure(&self) -> Option<&RawFailure> {
        match self {
            RunOutcome::AbortedWithError(aborted) => Some(&aborted.failure),
            _ => None,
        }
    }

    /// Whether the watchdog, not the run, decided this outcome.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            RunOutcome::TimedOut { .. } | RunOutcome::StillPending { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Committed(_) => "committed",
            RunOutcome::AbortedWithError(_) => "aborted",
            RunOutcome::TimedOut { .. } => "timed-out",
            RunOutcome::StillPending { .. } => "still-pending",
        }
    }
}

/// Role of a replica member as seen by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    Primary,
    Secondary,
    Unreachable,
    Down,
    Paused,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberRole::Primary => "PRIMARY",
            MemberRole::Secondary => "SECONDARY",
            MemberRole::Unreachable => "UNREACHABLE",
            MemberRole::Down => "DOWN",
            MemberRole::Paused => "PAUSED",
        };
        write!(f, "{}", s)
    }
}

/// Point-in-time snapshot of one replica member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    pub name: String,
    pub role: MemberRole,
    pub reachable: bool,
}

/// Helpers over a topology snapshot.
pub trait TopologyView {
    fn primary(&self) -> Option<&MemberState>;
    fn reachable_count(&self) -> usize;
    fn has_majority(&self) -> bool;
}

impl TopologyView for [MemberState] {
    fn primary(&self) -> Option<&MemberState> {
        self.iter().find(|m| m.role == MemberRole::Primary)
    }

    fn reachable_count(&self) -> usize {
        self.iter().filter(|m| m.reachable).count()
    }

    fn has_majority(&self) -> bool {
        self.reachable_count() > self.len() / 2
    }
}
