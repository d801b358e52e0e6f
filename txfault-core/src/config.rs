//! Environment-facing configuration for the scenario runner.

use crate::{HarnessError, Result, TimeoutPolicy};
use std::time::Duration;

pub const ENV_OPERATION_TIMEOUT_MS: &str = "TXFAULT_OPERATION_TIMEOUT_MS";
pub const ENV_WRITE_CONCERN_TIMEOUT_MS: &str = "TXFAULT_WRITE_CONCERN_TIMEOUT_MS";
pub const ENV_COMMIT_TIMEOUT_MS: &str = "TXFAULT_COMMIT_TIMEOUT_MS";
pub const ENV_WATCHDOG_MS: &str = "TXFAULT_WATCHDOG_MS";
pub const ENV_SCENARIOS: &str = "TXFAULT_SCENARIOS";
pub const ENV_REPORT_JSON: &str = "TXFAULT_REPORT_JSON";

/// Every scenario name `TXFAULT_SCENARIOS` may select.
pub const KNOWN_SCENARIOS: &[&str] = &[
    "lose-majority",
    "stepdown",
    "kill-member",
    "hang-on-write",
    "hang-on-commit",
];

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Bounded preset with any millisecond overrides applied
    pub bounded_policy: TimeoutPolicy,
    pub watchdog: Duration,
    /// Scenario names to run; empty runs all of them
    pub scenarios: Vec<String>,
    pub report_json: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bounded_policy: TimeoutPolicy::bounded(),
            watchdog: Duration::from_secs(10),
            scenarios: Vec::new(),
            report_json: false,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Absent timeout keys
    /// keep the Bounded preset's defaults; they never mean unbounded.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let operation_ms = parse_millis(&lookup, ENV_OPERATION_TIMEOUT_MS)?;
        let write_concern_ms = parse_millis(&lookup, ENV_WRITE_CONCERN_TIMEOUT_MS)?;
        let commit_ms = parse_millis(&lookup, ENV_COMMIT_TIMEOUT_MS)?;
        let bounded_policy =
            TimeoutPolicy::bounded_with_overrides(operation_ms, write_concern_ms, commit_ms)?;

        let mut config = Self {
            bounded_policy,
            ..Self::default()
        };

        if let Some(ms) = parse_millis(&lookup, ENV_WATCHDOG_MS)? {
            if ms <= 0 {
                return Err(HarnessError::config(
                    ENV_WATCHDOG_MS,
                    format!("watchdog must be positive, got {}", ms),
                ));
            }
            config.watchdog = Duration::from_millis(ms as u64);
        }

        if let Some(list) = lookup(ENV_SCENARIOS) {
            config.scenarios = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if let Some(unknown) = config
                .scenarios
                .iter()
                .find(|s| !KNOWN_SCENARIOS.contains(&s.as_str()))
            {
                return Err(HarnessError::config(
                    ENV_SCENARIOS,
                    format!(
                        "unknown scenario '{}', expected one of {}",
                        unknown,
                        KNOWN_SCENARIOS.join(", ")
                    ),
                ));
            }
        }

        if let Some(flag) = lookup(ENV_REPORT_JSON) {
            config.report_json = matches!(flag.trim(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_scenarios(mut self, scenarios: Vec<String>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn wants_scenario(&self, name: &str) -> bool {
        self.scenarios.is_empty() || self.scenarios.iter().any(|s| s == name)
    }
}

// Negative numbers parse here and are rejected by the policy, so the error
// names the knob rather than the parser.
fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<i64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| HarnessError::config(key, format!("'{}' is not an integer: {}", raw, e))),
    }
}
