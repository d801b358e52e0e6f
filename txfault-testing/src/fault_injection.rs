use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use txfault_core::{
    Checkpoint, FailureCategory, FailureReport, FaultAction, FaultControl, FaultTarget,
    HarnessConfig, HarnessError, MemberRole, OperationSpec, Result, RunOutcome, RunStage,
    ScenarioRunId, TimeoutPolicy, TopologyView, TransactionalStore,
};
use txfault_executor::{
    countdown, run_with_watchdog, CheckpointHook, OrphanedRun, TransactionExecutor,
};

/// One fault, applied when the run reaches `at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Injection {
    pub at: Checkpoint,
    pub action: FaultAction,
    pub target: FaultTarget,
}

impl Injection {
    pub fn new(at: Checkpoint, action: FaultAction, target: FaultTarget) -> Self {
        Self { at, action, target }
    }
}

/// Where a suspended run is expected to be stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SuspendedAt {
    Operation,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expectation {
    Committed,
    /// The first failure classifies into one of these categories
    Failure(Vec<FailureCategory>),
    /// The watchdog gives up on the run at the given point
    Suspended(SuspendedAt),
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Committed => write!(f, "Committed"),
            Expectation::Failure(categories) => {
                let names: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", names.join(" | "))
            }
            Expectation::Suspended(SuspendedAt::Operation) => write!(f, "Suspended in operation"),
            Expectation::Suspended(SuspendedAt::Commit) => write!(f, "Suspended in commit"),
        }
    }
}

/// A named pairing of policy, writes and injection schedule.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub policy: TimeoutPolicy,
    pub inserts: usize,
    /// Position of an inserted document to update after the inserts
    pub update_of: Option<usize>,
    pub injections: Vec<Injection>,
    pub expectation: Expectation,
    /// Extra attempts allowed when the classifier recommends a retry
    pub retry_budget: u32,
}

impl Scenario {
    pub fn spec(&self, run_id: ScenarioRunId) -> OperationSpec {
        let spec = OperationSpec::inserts(self.collection(), run_id, self.inserts);
        match self.update_of {
            Some(seq) => spec.with_update(seq),
            None => spec,
        }
    }

    /// The operation that follows the last operation-level injection,
    /// i.e. the write a suspension is expected to be stuck in.
    pub fn blocked_operation(&self) -> Option<usize> {
        self.injections
            .iter()
            .filter_map(|injection| match injection.at {
                Checkpoint::BeforeOperation(index) => Some(index),
                _ => None,
            })
            .max()
    }

    pub fn collection(&self) -> String {
        format!("txfault_{}", self.name.replace('-', "_"))
    }

    pub fn operation_count(&self) -> usize {
        self.inserts + usize::from(self.update_of.is_some())
    }

    /// True when any injection takes members away. Such scenarios are run
    /// one at a time.
    pub fn changes_availability(&self) -> bool {
        !self.injections.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.operation_count() == 0 {
            return Err(HarnessError::scenario_invalid(&self.name, "no operations"));
        }
        if let Some(seq) = self.update_of {
            if seq >= self.inserts {
                return Err(HarnessError::scenario_invalid(
                    &self.name,
                    format!("update targets insert #{} of {}", seq, self.inserts),
                ));
            }
        }
        for injection in &self.injections {
            if let Checkpoint::BeforeOperation(n) = injection.at {
                if n >= self.operation_count() {
                    return Err(HarnessError::scenario_invalid(
                        &self.name,
                        format!("checkpoint {} is never reached", injection.at),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock budget per attempt before a run counts as suspended
    pub watchdog: Duration,
    /// Visible delay after each injection before the run proceeds
    pub settle_delay: Duration,
    pub health_wait: Duration,
    /// Time a suspended run gets to finish after faults are lifted
    pub drain_budget: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(10),
            settle_delay: Duration::from_secs(1),
            health_wait: Duration::from_secs(30),
            drain_budget: Duration::from_secs(5),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_harness(config: &HarnessConfig) -> Self {
        Self {
            watchdog: config.watchdog,
            ..Self::default()
        }
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_drain_budget(mut self, budget: Duration) -> Self {
        self.drain_budget = budget;
        self
    }
}

/// Lifecycle of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScenarioState {
    Configuring,
    Running,
    Resolved { outcome: RunOutcome },
    Suspended { stage: RunStage, elapsed: Duration },
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioState::Configuring => write!(f, "configuring"),
            ScenarioState::Running => write!(f, "running"),
            ScenarioState::Resolved { outcome } => write!(f, "resolved ({})", outcome.label()),
            ScenarioState::Suspended { stage, .. } => write!(f, "suspended during {}", stage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Passed,
    Mismatch,
    /// A fully bounded run never resolved on its own
    BoundedRunHung,
    /// Preconditions or injections did not hold; neither pass nor fail
    Invalid,
}

impl Verdict {
    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Mismatch | Verdict::BoundedRunHung)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub description: String,
    pub run_id: Option<ScenarioRunId>,
    pub policy: TimeoutPolicy,
    pub expected: Expectation,
    pub state: ScenarioState,
    /// First failure of the scenario, raw fields next to the classification
    pub failure: Option<FailureReport>,
    pub attempts: u32,
    /// What a suspended run turned into once its faults were lifted
    pub late_outcome: Option<RunOutcome>,
    pub injected: Vec<String>,
    pub verdict: Verdict,
    pub details: String,
    pub duration: Duration,
}

impl ScenarioReport {
    fn new(scenario: &Scenario) -> Self {
        Self {
            scenario: scenario.name.clone(),
            description: scenario.description.clone(),
            run_id: None,
            policy: scenario.policy.clone(),
            expected: scenario.expectation.clone(),
            state: ScenarioState::Configuring,
            failure: None,
            attempts: 0,
            late_outcome: None,
            injected: Vec::new(),
            verdict: Verdict::Invalid,
            details: String::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn observed(&self) -> String {
        match &self.state {
            ScenarioState::Resolved { outcome } => {
                let mut observed = match &self.failure {
                    Some(failure) => failure.classified.category.to_string(),
                    None if outcome.is_committed() => "Committed".to_string(),
                    None => outcome.label().to_string(),
                };
                if self.attempts > 1 {
                    observed.push_str(&format!(
                        " ({} attempts, final {})",
                        self.attempts,
                        outcome.label()
                    ));
                }
                observed
            }
            state => state.to_string(),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Checkpoint hook that applies a scenario's injections.
struct InjectionHook {
    scenario: String,
    control: Arc<dyn FaultControl>,
    injections: Vec<Injection>,
    settle_delay: Duration,
    injected: Mutex<Vec<String>>,
    problems: Mutex<Vec<String>>,
}

impl InjectionHook {
    fn new(
        scenario: &Scenario,
        control: Arc<dyn FaultControl>,
        injections: Vec<Injection>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            scenario: scenario.name.clone(),
            control,
            injections,
            settle_delay,
            injected: Mutex::new(Vec::new()),
            problems: Mutex::new(Vec::new()),
        }
    }

    async fn inject(&self, injection: &Injection) -> Result<()> {
        let topology = self.control.current_topology().await?;
        let members = injection.target.resolve(&topology)?;
        warn!(
            "[{}] injecting {} on {} at {}",
            self.scenario,
            injection.action,
            members.join(","),
            injection.at
        );
        injection
            .action
            .apply(self.control.as_ref(), &members)
            .await?;

        let after = self.control.current_topology().await?;
        for name in &members {
            let state = after
                .iter()
                .find(|m| &m.name == name)
                .ok_or_else(|| HarnessError::unknown_member(name.clone()))?;
            let took_effect = if injection.action.makes_unreachable() {
                !state.reachable
            } else {
                state.role != MemberRole::Primary
            };
            if !took_effect {
                return Err(HarnessError::scenario_invalid(
                    &self.scenario,
                    format!("{} on {} did not take effect", injection.action, name),
                ));
            }
        }

        self.injected.lock().push(format!(
            "{} {} at {}",
            injection.action,
            members.join(","),
            injection.at
        ));
        Ok(())
    }
}

#[async_trait]
impl CheckpointHook for InjectionHook {
    async fn on_checkpoint(&self, checkpoint: Checkpoint) {
        let due: Vec<&Injection> = self
            .injections
            .iter()
            .filter(|i| i.at == checkpoint)
            .collect();
        if due.is_empty() {
            return;
        }
        for injection in due {
            if let Err(e) = self.inject(injection).await {
                error!("[{}] injection at {} failed: {}", self.scenario, checkpoint, e);
                self.problems.lock().push(e.to_string());
            }
        }
        countdown(&format!("[{}] {}", self.scenario, checkpoint), self.settle_delay).await;
    }
}

/// Runs scenarios against a store and the control surface of the same
/// replica set.
pub struct ScenarioOrchestrator {
    store: Arc<dyn TransactionalStore>,
    control: Arc<dyn FaultControl>,
    config: OrchestratorConfig,
    // Member availability is global; scenarios that change it never overlap.
    availability: tokio::sync::Mutex<()>,
}

impl ScenarioOrchestrator {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        control: Arc<dyn FaultControl>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            control,
            config,
            availability: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        let _exclusive = if scenario.changes_availability() {
            Some(self.availability.lock().await)
        } else {
            None
        };

        info!("Running scenario: {} ({})", scenario.name, scenario.policy);
        let started = Instant::now();
        let mut report = ScenarioReport::new(scenario);

        if let Err(e) = self.check_preconditions(scenario).await {
            warn!("Scenario {} is invalid: {}", scenario.name, e);
            report.details = e.to_string();
            report.duration = started.elapsed();
            return report;
        }

        report.state = ScenarioState::Running;
        let run_id = ScenarioRunId::new(&scenario.name);
        report.run_id = Some(run_id.clone());
        let spec = scenario.spec(run_id);
        let mut orphan: Option<OrphanedRun> = None;
        let mut problems: Vec<String> = Vec::new();

        loop {
            report.attempts += 1;
            // Faults are injected on the first attempt only; retries run on a
            // fresh transaction against whatever topology is left.
            let injections = if report.attempts == 1 {
                scenario.injections.clone()
            } else {
                Vec::new()
            };
            let hook = Arc::new(InjectionHook::new(
                scenario,
                self.control.clone(),
                injections,
                self.config.settle_delay,
            ));
            let executor = Arc::new(TransactionExecutor::new(self.store.clone()));

            let watched = run_with_watchdog(
                executor,
                scenario.policy.clone(),
                spec.clone(),
                hook.clone(),
                self.config.watchdog,
            )
            .await;

            report.injected.extend(hook.injected.lock().drain(..));
            problems.extend(hook.problems.lock().drain(..));

            let watched = match watched {
                Ok(watched) => watched,
                Err(e) => {
                    problems.push(e.to_string());
                    break;
                }
            };
            orphan = watched.orphan;

            let outcome = watched.outcome;
            if let RunOutcome::StillPending { stage, elapsed } = outcome {
                report.state = ScenarioState::Suspended { stage, elapsed };
                break;
            }

            let retry = match outcome.raw_failure() {
                Some(raw) => {
                    let failure = FailureReport::new(raw.clone());
                    info!("Scenario {} attempt {}: {}", scenario.name, report.attempts, failure);
                    let retry = failure.classified.recommended_action.is_retry()
                        && !failure.classified.commit_outcome_ambiguous
                        && report.attempts <= scenario.retry_budget;
                    if report.failure.is_none() {
                        report.failure = Some(failure);
                    }
                    retry
                }
                None => false,
            };
            report.state = ScenarioState::Resolved { outcome };
            if !retry {
                break;
            }
            info!("Scenario {} retrying on a new transaction", scenario.name);
        }

        self.cleanup(scenario, &mut report, orphan).await;

        if !problems.is_empty() {
            report.verdict = Verdict::Invalid;
            report.details = problems.join("; ");
        } else {
            report.verdict = judge(scenario, &report);
            report.details = format!("Expected: {}, Observed: {}", report.expected, report.observed());
        }
        report.duration = started.elapsed();

        match report.verdict {
            Verdict::Passed => info!("Scenario {} passed: {}", scenario.name, report.details),
            Verdict::Invalid => warn!("Scenario {} invalid: {}", scenario.name, report.details),
            _ => error!(
                "Scenario {} failed ({:?}): {}",
                scenario.name, report.verdict, report.details
            ),
        }
        report
    }

    pub async fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioReport> {
        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            reports.push(self.run_scenario(scenario).await);
        }
        reports
    }

    async fn check_preconditions(&self, scenario: &Scenario) -> Result<()> {
        scenario.validate()?;
        let topology = self.control.current_topology().await?;
        if topology.primary().is_none() {
            return Err(HarnessError::scenario_invalid(&scenario.name, "no primary"));
        }
        if topology.reachable_count() != topology.len() {
            return Err(HarnessError::scenario_invalid(
                &scenario.name,
                format!(
                    "only {} of {} members reachable",
                    topology.reachable_count(),
                    topology.len()
                ),
            ));
        }
        Ok(())
    }

    // Lift every fault first, so a suspended run can drain.
    async fn cleanup(
        &self,
        scenario: &Scenario,
        report: &mut ScenarioReport,
        orphan: Option<OrphanedRun>,
    ) {
        if scenario.changes_availability() {
            match self.control.current_topology().await {
                Ok(topology) => {
                    let names: Vec<String> = topology.iter().map(|m| m.name.clone()).collect();
                    if let Err(e) = self.control.restore(&names).await {
                        error!("Scenario {}: restore failed: {}", scenario.name, e);
                    }
                    for name in &names {
                        if !self.control.wait_healthy(name, self.config.health_wait).await {
                            warn!("Scenario {}: {} did not become healthy", scenario.name, name);
                        }
                    }
                }
                Err(e) => error!("Scenario {}: topology unavailable: {}", scenario.name, e),
            }
        }

        if let Some(orphan) = orphan {
            report.late_outcome = orphan.drain(self.config.drain_budget).await;
        }
    }
}

fn judge(scenario: &Scenario, report: &ScenarioReport) -> Verdict {
    if let ScenarioState::Resolved {
        outcome: RunOutcome::TimedOut { .. },
    } = report.state
    {
        return Verdict::BoundedRunHung;
    }

    let matched = match (&scenario.expectation, &report.state) {
        (Expectation::Committed, ScenarioState::Resolved { outcome }) => {
            outcome.is_committed() && report.failure.is_none()
        }
        (Expectation::Failure(categories), ScenarioState::Resolved { .. }) => report
            .failure
            .as_ref()
            .map(|f| categories.contains(&f.classified.category))
            .unwrap_or(false),
        (Expectation::Suspended(at), ScenarioState::Suspended { stage, .. }) => match (at, stage) {
            (SuspendedAt::Operation, RunStage::Operation(index)) => scenario
                .blocked_operation()
                .map_or(true, |expected| expected == *index),
            (SuspendedAt::Commit, RunStage::Committing) => true,
            _ => false,
        },
        _ => false,
    };

    if matched {
        Verdict::Passed
    } else {
        Verdict::Mismatch
    }
}
