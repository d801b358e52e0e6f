//! # Error Classifier
//!
//! Maps a [`RawFailure`] to one of a closed set of categories and a
//! recommended recovery action. The mapping is a pure, total function:
//! rules are evaluated in a fixed precedence order and the first match wins.
//!
//! | # | Match                                   | Category              | Action             |
//! |---|-----------------------------------------|-----------------------|--------------------|
//! | 1 | operation time limit name/code          | `OperationTimeout`    | `RetryOperation`   |
//! | 2 | write-concern timeout name/code         | `WriteConcernTimeout` | `Abort`            |
//! | 3 | commit time limit name/code             | `CommitTimeout`       | `Abort`            |
//! | 4 | retryable label present                 | `Retryable`           | `RetryTransaction` |
//! | 5 | topology/role change name               | `TopologyChange`      | `RetryTransaction` |
//! | 6 | anything else                           | `Unclassified`        | `Abort`            |
//!
//! A commit-timeout failure that also carries a retryable label is a
//! `CommitTimeout`: commit ambiguity outranks the generic retry hint.

use crate::RawFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

const OPERATION_TIMEOUT_CODES: &[i32] = &[50];
const OPERATION_TIMEOUT_NAMES: &[&str] = &["MaxTimeMSExpired", "OperationTimeout"];

const WRITE_CONCERN_TIMEOUT_CODES: &[i32] = &[64];
const WRITE_CONCERN_TIMEOUT_NAMES: &[&str] =
    &["WriteConcernFailed", "WriteConcernTimeout", "WTimeout"];

const COMMIT_TIMEOUT_CODES: &[i32] = &[262];
const COMMIT_TIMEOUT_NAMES: &[&str] =
    &["ExceededTimeLimit", "CommitTimeout", "TransactionCommitTimeout"];

const TOPOLOGY_CHANGE: &[(i32, &str)] = &[
    (6, "HostUnreachable"),
    (7, "HostNotFound"),
    (91, "ShutdownInProgress"),
    (189, "PrimarySteppedDown"),
    (10107, "NotWritablePrimary"),
    (11600, "InterruptedAtShutdown"),
    (11602, "InterruptedDueToReplStateChange"),
    (13435, "NotPrimaryNoSecondaryOk"),
    (13436, "NotPrimaryOrSecondary"),
];

const UNKNOWN_COMMIT_RESULT_LABEL: &str = "UnknownTransactionCommitResult";

/// Failure categories produced by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    OperationTimeout,
    WriteConcernTimeout,
    CommitTimeout,
    TopologyChange,
    Retryable,
    Unclassified,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::OperationTimeout => "OperationTimeout",
            FailureCategory::WriteConcernTimeout => "WriteConcernTimeout",
            FailureCategory::CommitTimeout => "CommitTimeout",
            FailureCategory::TopologyChange => "TopologyChange",
            FailureCategory::Retryable => "Retryable",
            FailureCategory::Unclassified => "Unclassified",
        };
        write!(f, "{}", s)
    }
}

/// What the caller should do about a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecommendedAction {
    Abort,
    RetryTransaction,
    RetryOperation,
    None,
}

impl RecommendedAction {
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RecommendedAction::RetryTransaction | RecommendedAction::RetryOperation
        )
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendedAction::Abort => "Abort",
            RecommendedAction::RetryTransaction => "RetryTransaction",
            RecommendedAction::RetryOperation => "RetryOperation",
            RecommendedAction::None => "None",
        };
        write!(f, "{}", s)
    }
}

/// Result of classifying a [`RawFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassifiedFailure {
    pub category: FailureCategory,
    pub recommended_action: RecommendedAction,
    /// The client cannot tell whether the transaction applied on some
    /// members. Retrying is only safe with idempotent payloads.
    pub commit_outcome_ambiguous: bool,
}

/// Classifies a raw failure. Never panics and never fails.
///
/// # Examples
///
/// ```rust
/// use txfault_core::{classify, FailureCategory, RawFailure, RecommendedAction};
///
/// let raw = RawFailure::coded(262, "ExceededTimeLimit", "commit exceeded its budget")
///     .with_label("UnknownTransactionCommitResult");
/// let classified = classify(&raw);
/// assert_eq!(classified.category, FailureCategory::CommitTimeout);
/// assert_eq!(classified.recommended_action, RecommendedAction::Abort);
/// assert!(classified.commit_outcome_ambiguous);
/// ```
pub fn classify(raw: &RawFailure) -> ClassifiedFailure {
    let (category, recommended_action) = if matches_any(
        raw,
        OPERATION_TIMEOUT_CODES,
        OPERATION_TIMEOUT_NAMES,
    ) {
        (FailureCategory::OperationTimeout, RecommendedAction::RetryOperation)
    } else if matches_any(raw, WRITE_CONCERN_TIMEOUT_CODES, WRITE_CONCERN_TIMEOUT_NAMES) {
        (FailureCategory::WriteConcernTimeout, RecommendedAction::Abort)
    } else if matches_any(raw, COMMIT_TIMEOUT_CODES, COMMIT_TIMEOUT_NAMES) {
        (FailureCategory::CommitTimeout, RecommendedAction::Abort)
    } else if raw.retryable_label_present {
        (FailureCategory::Retryable, RecommendedAction::RetryTransaction)
    } else if is_topology_change(raw) {
        (FailureCategory::TopologyChange, RecommendedAction::RetryTransaction)
    } else {
        (FailureCategory::Unclassified, RecommendedAction::Abort)
    };

    let commit_outcome_ambiguous = matches!(
        category,
        FailureCategory::CommitTimeout | FailureCategory::WriteConcernTimeout
    ) || raw.has_label(UNKNOWN_COMMIT_RESULT_LABEL);

    ClassifiedFailure {
        category,
        recommended_action,
        commit_outcome_ambiguous,
    }
}

fn matches_any(raw: &RawFailure, codes: &[i32], names: &[&str]) -> bool {
    let by_code = raw.code.map(|c| codes.contains(&c)).unwrap_or(false);
    let by_name = raw
        .symbolic_name
        .as_deref()
        .map(|n| names.contains(&n))
        .unwrap_or(false);
    by_code || by_name
}

// Names decide; the code is only consulted when the engine sent no name.
fn is_topology_change(raw: &RawFailure) -> bool {
    match raw.symbolic_name.as_deref() {
        Some(name) => TOPOLOGY_CHANGE.iter().any(|(_, n)| *n == name),
        None => raw
            .code
            .map(|code| TOPOLOGY_CHANGE.iter().any(|(c, _)| *c == code))
            .unwrap_or(false),
    }
}

/// A raw failure reported next to its classification, so operators see the
/// engine's own signal and the derived category together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub raw: RawFailure,
    pub classified: ClassifiedFailure,
}

impl FailureReport {
    pub fn new(raw: RawFailure) -> Self {
        let classified = classify(&raw);
        Self { raw, classified }
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} / {}",
            self.raw, self.classified.category, self.classified.recommended_action
        )?;
        if self.classified.commit_outcome_ambiguous {
            write!(f, " (commit outcome ambiguous)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dispatch_table() {
        let cases = vec![
            (
                RawFailure::coded(50, "MaxTimeMSExpired", "op too slow"),
                FailureCategory::OperationTimeout,
                RecommendedAction::RetryOperation,
            ),
            (
                RawFailure::coded(64, "WriteConcernFailed", "waiting for replication timed out"),
                FailureCategory::WriteConcernTimeout,
                RecommendedAction::Abort,
            ),
            (
                RawFailure::coded(262, "ExceededTimeLimit", "commit too slow"),
                FailureCategory::CommitTimeout,
                RecommendedAction::Abort,
            ),
            (
                RawFailure::coded(112, "WriteConflict", "conflict")
                    .with_label("TransientTransactionError"),
                FailureCategory::Retryable,
                RecommendedAction::RetryTransaction,
            ),
            (
                RawFailure::coded(91, "ShutdownInProgress", "shutting down"),
                FailureCategory::TopologyChange,
                RecommendedAction::RetryTransaction,
            ),
            (
                RawFailure::coded(11000, "DuplicateKey", "E11000 duplicate key"),
                FailureCategory::Unclassified,
                RecommendedAction::Abort,
            ),
        ];

        for (raw, category, action) in cases {
            let classified = classify(&raw);
            assert_eq!(classified.category, category, "{}", raw);
            assert_eq!(classified.recommended_action, action, "{}", raw);
        }
    }

    #[test]
    fn test_commit_timeout_outranks_retryable_label() {
        let raw = RawFailure::coded(262, "ExceededTimeLimit", "commit too slow")
            .with_label("TransientTransactionError");
        assert!(raw.retryable_label_present);
        let classified = classify(&raw);
        assert_eq!(classified.category, FailureCategory::CommitTimeout);
        assert_eq!(classified.recommended_action, RecommendedAction::Abort);
    }

    #[test]
    fn test_write_concern_outranks_unknown_commit_label() {
        let raw = RawFailure::coded(64, "WriteConcernFailed", "wtimeout")
            .with_label("UnknownTransactionCommitResult");
        let classified = classify(&raw);
        assert_eq!(classified.category, FailureCategory::WriteConcernTimeout);
        assert!(classified.commit_outcome_ambiguous);
    }

    #[test]
    fn test_labelled_topology_error_is_retryable() {
        let raw = RawFailure::coded(10107, "NotWritablePrimary", "not primary")
            .with_label("TransientTransactionError");
        assert_eq!(classify(&raw).category, FailureCategory::Retryable);
    }

    #[test]
    fn test_name_or_code_alone_matches_timeouts() {
        assert_eq!(
            classify(&RawFailure::new("x").with_code(64)).category,
            FailureCategory::WriteConcernTimeout
        );
        assert_eq!(
            classify(&RawFailure::new("x").with_name("CommitTimeout")).category,
            FailureCategory::CommitTimeout
        );
    }

    #[test]
    fn test_topology_code_used_only_without_name() {
        assert_eq!(
            classify(&RawFailure::new("x").with_code(11602)).category,
            FailureCategory::TopologyChange
        );
        assert_eq!(
            classify(&RawFailure::new("x").with_code(11602).with_name("Other")).category,
            FailureCategory::Unclassified
        );
    }

    #[test]
    fn test_empty_failure_is_unclassified() {
        let classified = classify(&RawFailure::new(""));
        assert_eq!(classified.category, FailureCategory::Unclassified);
        assert_eq!(classified.recommended_action, RecommendedAction::Abort);
        assert!(!classified.commit_outcome_ambiguous);
    }

    #[test]
    fn test_failure_report_keeps_raw_fields() {
        let raw = RawFailure::coded(64, "WriteConcernFailed", "waiting for replication timed out");
        let report = FailureReport::new(raw.clone());
        assert_eq!(report.raw, raw);
        let rendered = report.to_string();
        assert!(rendered.contains("code=64"));
        assert!(rendered.contains("WriteConcernFailed"));
        assert!(rendered.contains("waiting for replication timed out"));
        assert!(rendered.contains("WriteConcernTimeout"));
    }

    fn arb_raw_failure() -> impl Strategy<Value = RawFailure> {
        let names = prop_oneof![
            Just(None),
            Just(Some("MaxTimeMSExpired".to_string())),
            Just(Some("WriteConcernFailed".to_string())),
            Just(Some("ExceededTimeLimit".to_string())),
            Just(Some("NotWritablePrimary".to_string())),
            Just(Some("DuplicateKey".to_string())),
            "[A-Za-z]{0,24}".prop_map(Some),
        ];
        let codes = prop_oneof![
            Just(None),
            Just(Some(50)),
            Just(Some(64)),
            Just(Some(262)),
            Just(Some(10107)),
            any::<i32>().prop_map(Some),
        ];
        let labels = proptest::collection::vec(
            prop_oneof![
                Just("TransientTransactionError".to_string()),
                Just("UnknownTransactionCommitResult".to_string()),
                Just("NoWritesPerformed".to_string()),
            ],
            0..3,
        );
        (codes, names, ".{0,40}", labels).prop_map(|(code, name, message, labels)| {
            let mut raw = RawFailure::new(message);
            raw.code = code;
            raw.symbolic_name = name;
            for label in labels {
                raw = raw.with_label(label);
            }
            raw
        })
    }

    proptest! {
        #[test]
        fn prop_classify_is_deterministic(raw in arb_raw_failure()) {
            prop_assert_eq!(classify(&raw), classify(&raw.clone()));
        }

        #[test]
        fn prop_commit_timeout_never_downgraded_to_retryable(
            raw in arb_raw_failure(),
        ) {
            let raw = raw.with_name("ExceededTimeLimit").with_label("TransientTransactionError");
            let classified = classify(&raw);
            prop_assert_ne!(classified.category, FailureCategory::Retryable);
            prop_assert_ne!(classified.recommended_action, RecommendedAction::RetryTransaction);
        }

        #[test]
        fn prop_retry_actions_only_for_retry_categories(raw in arb_raw_failure()) {
            let classified = classify(&raw);
            if classified.recommended_action.is_retry() {
                prop_assert!(matches!(
                    classified.category,
                    FailureCategory::OperationTimeout
                        | FailureCategory::Retryable
                        | FailureCategory::TopologyChange
                ));
            }
        }
    }
}
