//! # Error Types
//!
//! Harness-level errors. Failures reported by the storage engine are not
//! errors at this level: they are captured verbatim as [`RawFailure`] values
//! and travel inside a [`RunOutcome`].
//!
//! [`RawFailure`]: crate::RawFailure
//! [`RunOutcome`]: crate::RunOutcome

use thiserror::Error;

/// Error types raised by the harness itself.
///
/// # Error Categories
///
/// - **Construction Errors**: invalid timeout policies and configuration,
///   always raised before any network I/O
/// - **Control Errors**: the fault injection layer could not apply or
///   undo a fault
/// - **Scenario Errors**: a scenario could not be set up against the
///   current topology
///
/// # Examples
///
/// ```rust
/// use txfault_core::HarnessError;
///
/// let error = HarnessError::invalid_policy("commit_timeout", "negative duration: -5ms");
/// assert!(error.is_fatal_before_io());
/// ```
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A timeout policy field was neither a non-negative duration nor unbounded
    #[error("Invalid policy: {field}: {reason}")]
    InvalidPolicy { field: String, reason: String },

    /// An environment or configuration value could not be parsed
    #[error("Configuration error: {key}: {reason}")]
    Config { key: String, reason: String },

    /// The control surface does not know the named member
    #[error("Unknown replica member: {member}")]
    UnknownMember { member: String },

    /// The control surface failed to apply or undo a fault
    #[error("Fault control failed for {member}: {reason}")]
    Control { member: String, reason: String },

    /// A scenario precondition or injection check did not hold
    #[error("Scenario {scenario} is invalid: {reason}")]
    ScenarioInvalid { scenario: String, reason: String },

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub fn invalid_policy(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_member(member: impl Into<String>) -> Self {
        Self::UnknownMember {
            member: member.into(),
        }
    }

    pub fn control(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Control {
            member: member.into(),
            reason: reason.into(),
        }
    }

    pub fn scenario_invalid(scenario: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ScenarioInvalid {
            scenario: scenario.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is raised while building a run, before the
    /// harness has talked to the store or the control surface.
    pub fn is_fatal_before_io(&self) -> bool {
        matches!(self, Self::InvalidPolicy { .. } | Self::Config { .. })
    }
}
