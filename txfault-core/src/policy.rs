//! # Timeout Policy
//!
//! The four timeout knobs a transaction run is configured with, plus the
//! server selection budget. `Unbounded` is always an explicit value: a knob
//! that was never configured and a knob configured to zero are different
//! things, and the harness exists to tell them apart.

use crate::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A single timeout knob.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use txfault_core::Timeout;
///
/// let t = Timeout::from_millis("commit_timeout", 250).unwrap();
/// assert_eq!(t, Timeout::Bounded(Duration::from_millis(250)));
/// assert!(Timeout::from_millis("commit_timeout", -1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeout {
    /// Engine-enforced bound, zero included
    Bounded(Duration),
    /// No bound at all
    Unbounded,
}

impl Timeout {
    pub fn millis(millis: u64) -> Self {
        Self::Bounded(Duration::from_millis(millis))
    }

    /// Builds a bounded timeout from a signed millisecond value, rejecting
    /// negative input with `InvalidPolicy`.
    pub fn from_millis(field: &str, millis: i64) -> Result<Self> {
        if millis < 0 {
            return Err(HarnessError::invalid_policy(
                field,
                format!("negative duration: {}ms", millis),
            ));
        }
        Ok(Self::Bounded(Duration::from_millis(millis as u64)))
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Bounded(d) => Some(*d),
            Self::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// The tighter of two bounds. `Unbounded` only wins against `Unbounded`.
    pub fn min(self, other: Timeout) -> Timeout {
        match (self, other) {
            (Self::Bounded(a), Self::Bounded(b)) => Self::Bounded(a.min(b)),
            (Self::Bounded(a), Self::Unbounded) | (Self::Unbounded, Self::Bounded(a)) => {
                Self::Bounded(a)
            }
            (Self::Unbounded, Self::Unbounded) => Self::Unbounded,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(d) => write!(f, "{}ms", d.as_millis()),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Which preset a policy started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyPreset {
    Bounded,
    Unbounded,
    Custom,
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded => write!(f, "bounded"),
            Self::Unbounded => write!(f, "unbounded"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Timeout configuration for one transaction run.
///
/// There is no `Default` implementation: every run declares its policy
/// explicitly through [`TimeoutPolicy::bounded`], [`TimeoutPolicy::unbounded`]
/// or [`TimeoutPolicy::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    preset: PolicyPreset,
    operation_timeout: Timeout,
    write_concern_timeout: Timeout,
    commit_timeout: Timeout,
    socket_timeout: Timeout,
    server_selection_timeout: Duration,
}

impl TimeoutPolicy {
    pub const BOUNDED_OPERATION_TIMEOUT: Duration = Duration::from_millis(1_000);
    pub const BOUNDED_WRITE_CONCERN_TIMEOUT: Duration = Duration::from_millis(2_000);
    pub const BOUNDED_COMMIT_TIMEOUT: Duration = Duration::from_millis(3_000);
    pub const BOUNDED_SOCKET_TIMEOUT: Duration = Duration::from_millis(5_000);
    pub const BOUNDED_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_millis(2_000);
    pub const UNBOUNDED_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        operation_timeout: Timeout,
        write_concern_timeout: Timeout,
        commit_timeout: Timeout,
        socket_timeout: Timeout,
        server_selection_timeout: Duration,
    ) -> Self {
        Self {
            preset: PolicyPreset::Custom,
            operation_timeout,
            write_concern_timeout,
            commit_timeout,
            socket_timeout,
            server_selection_timeout,
        }
    }

    /// Production-safe small bounds on every knob.
    pub fn bounded() -> Self {
        Self {
            preset: PolicyPreset::Bounded,
            operation_timeout: Timeout::Bounded(Self::BOUNDED_OPERATION_TIMEOUT),
            write_concern_timeout: Timeout::Bounded(Self::BOUNDED_WRITE_CONCERN_TIMEOUT),
            commit_timeout: Timeout::Bounded(Self::BOUNDED_COMMIT_TIMEOUT),
            socket_timeout: Timeout::Bounded(Self::BOUNDED_SOCKET_TIMEOUT),
            server_selection_timeout: Self::BOUNDED_SERVER_SELECTION_TIMEOUT,
        }
    }

    /// Socket, write-concern, commit and operation timeouts unbounded. Server
    /// selection stays large but finite so a connection is still attempted.
    pub fn unbounded() -> Self {
        Self {
            preset: PolicyPreset::Unbounded,
            operation_timeout: Timeout::Unbounded,
            write_concern_timeout: Timeout::Unbounded,
            commit_timeout: Timeout::Unbounded,
            socket_timeout: Timeout::Unbounded,
            server_selection_timeout: Self::UNBOUNDED_SERVER_SELECTION_TIMEOUT,
        }
    }

    /// Bounded preset with optional millisecond overrides; `None` keeps the
    /// preset default. Negative values fail with `InvalidPolicy`.
    pub fn bounded_with_overrides(
        operation_ms: Option<i64>,
        write_concern_ms: Option<i64>,
        commit_ms: Option<i64>,
    ) -> Result<Self> {
        let mut policy = Self::bounded();
        if let Some(ms) = operation_ms {
            policy = policy.with_operation_timeout(Timeout::from_millis("operation_timeout", ms)?);
        }
        if let Some(ms) = write_concern_ms {
            policy = policy
                .with_write_concern_timeout(Timeout::from_millis("write_concern_timeout", ms)?);
        }
        if let Some(ms) = commit_ms {
            policy = policy.with_commit_timeout(Timeout::from_millis("commit_timeout", ms)?);
        }
        Ok(policy)
    }

    pub fn with_operation_timeout(mut self, timeout: Timeout) -> Self {
        self.operation_timeout = timeout;
        self.mark_custom();
        self
    }

    pub fn with_write_concern_timeout(mut self, timeout: Timeout) -> Self {
        self.write_concern_timeout = timeout;
        self.mark_custom();
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Timeout) -> Self {
        self.commit_timeout = timeout;
        self.mark_custom();
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Timeout) -> Self {
        self.socket_timeout = timeout;
        self.mark_custom();
        self
    }

    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self.mark_custom();
        self
    }

    // Overriding a bounded knob with another bound keeps the preset's meaning.
    fn mark_custom(&mut self) {
        let still_bounded = self.preset == PolicyPreset::Bounded && self.is_fully_bounded();
        if !still_bounded {
            self.preset = PolicyPreset::Custom;
        }
    }

    pub fn preset(&self) -> PolicyPreset {
        self.preset
    }

    pub fn operation_timeout(&self) -> Timeout {
        self.operation_timeout
    }

    pub fn write_concern_timeout(&self) -> Timeout {
        self.write_concern_timeout
    }

    pub fn commit_timeout(&self) -> Timeout {
        self.commit_timeout
    }

    pub fn socket_timeout(&self) -> Timeout {
        self.socket_timeout
    }

    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// True when every knob that can block a run carries a bound. A run under
    /// such a policy must always terminate on its own.
    pub fn is_fully_bounded(&self) -> bool {
        !self.operation_timeout.is_unbounded()
            && !self.write_concern_timeout.is_unbounded()
            && !self.commit_timeout.is_unbounded()
            && !self.socket_timeout.is_unbounded()
    }
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (op={}, wtimeout={}, commit={}, socket={}, server_selection={}ms)",
            self.preset,
            self.operation_timeout,
            self.write_concern_timeout,
            self.commit_timeout,
            self.socket_timeout,
            self.server_selection_timeout.as_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_duration_is_invalid_policy() {
        let err = Timeout::from_millis("write_concern_timeout", -10).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPolicy { ref field, .. } if field == "write_concern_timeout"));
        assert!(err.is_fatal_before_io());
    }

    #[test]
    fn test_zero_is_bounded_not_unbounded() {
        let zero = Timeout::from_millis("commit_timeout", 0).unwrap();
        assert_eq!(zero, Timeout::Bounded(Duration::ZERO));
        assert!(!zero.is_unbounded());
    }

    #[test]
    fn test_presets() {
        let bounded = TimeoutPolicy::bounded();
        assert!(bounded.is_fully_bounded());
        assert_eq!(bounded.preset(), PolicyPreset::Bounded);
        assert_eq!(bounded.write_concern_timeout(), Timeout::millis(2_000));

        let unbounded = TimeoutPolicy::unbounded();
        assert!(!unbounded.is_fully_bounded());
        assert!(unbounded.socket_timeout().is_unbounded());
        assert!(unbounded.write_concern_timeout().is_unbounded());
        assert!(unbounded.commit_timeout().is_unbounded());
        assert!(unbounded.server_selection_timeout() > Duration::ZERO);
    }

    #[test]
    fn test_overrides_absent_keep_bounded_defaults() {
        let policy = TimeoutPolicy::bounded_with_overrides(None, None, None).unwrap();
        assert_eq!(policy, TimeoutPolicy::bounded());

        let policy = TimeoutPolicy::bounded_with_overrides(Some(50), None, Some(0)).unwrap();
        assert_eq!(policy.operation_timeout(), Timeout::millis(50));
        assert_eq!(policy.commit_timeout(), Timeout::millis(0));
        assert_eq!(policy.preset(), PolicyPreset::Bounded);

        assert!(TimeoutPolicy::bounded_with_overrides(None, Some(-1), None).is_err());
    }

    #[test]
    fn test_unbounding_a_knob_leaves_the_bounded_preset() {
        let policy = TimeoutPolicy::bounded().with_commit_timeout(Timeout::Unbounded);
        assert_eq!(policy.preset(), PolicyPreset::Custom);
        assert!(!policy.is_fully_bounded());
    }

    #[test]
    fn test_timeout_min() {
        let a = Timeout::millis(10);
        let b = Timeout::millis(20);
        assert_eq!(a.min(b), a);
        assert_eq!(Timeout::Unbounded.min(b), b);
        assert_eq!(Timeout::Unbounded.min(Timeout::Unbounded), Timeout::Unbounded);
    }
}
