//! In-memory replica set.
//!
//! Implements both [`TransactionalStore`] and [`FaultControl`] so the
//! executor and the scenario table run without containers. Writes inside a
//! transaction are staged and applied on commit; a commit needs a majority
//! of members up. Blocked calls wait on a change counter and give up only
//! when one of the timeouts passed in by the client expires, the way a real
//! engine and driver would. With every relevant knob unbounded they wait
//! until the topology changes.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use txfault_core::{
    FaultControl, HarnessError, MemberRole, MemberState, Operation, RawFailure, Result,
    StoreTransaction, Timeout, TransactionOptions, TransactionalStore, WriteAck,
};

const TRANSIENT: &str = "TransientTransactionError";
const UNKNOWN_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub member_count: usize,
    pub latency_min: Duration,
    pub latency_max: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            member_count: 3,
            latency_min: Duration::from_millis(1),
            latency_max: Duration::from_millis(5),
        }
    }
}

impl SimulatorConfig {
    pub fn with_member_count(mut self, count: usize) -> Self {
        self.member_count = count.max(1);
        self
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency_min = min;
        self.latency_max = max.max(min);
        self
    }
}

/// Infrastructure-level state of one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberHealth {
    Up,
    Stopped,
    Killed,
    Paused,
    Partitioned,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulatorStats {
    pub transactions_started: u64,
    pub operations: u64,
    pub commits: u64,
    pub aborts: u64,
    pub elections: u64,
}

struct Member {
    name: String,
    health: MemberHealth,
}

struct ClusterState {
    members: Vec<Member>,
    primary: Option<usize>,
    term: u64,
}

impl ClusterState {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    fn up_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.health == MemberHealth::Up)
            .count()
    }

    fn has_majority(&self) -> bool {
        self.up_count() > self.members.len() / 2
    }

    // A primary that lost its health is replaced only while a majority can
    // still vote; otherwise it keeps the role and resumes it when restored.
    fn ensure_primary(&mut self) -> Option<usize> {
        if let Some(p) = self.primary {
            if self.members[p].health == MemberHealth::Up {
                return None;
            }
        }
        if !self.has_majority() {
            return None;
        }
        let elected = self
            .members
            .iter()
            .position(|m| m.health == MemberHealth::Up)?;
        self.primary = Some(elected);
        self.term += 1;
        Some(elected)
    }

    fn snapshot(&self) -> Vec<MemberState> {
        self.members
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let role = match m.health {
                    MemberHealth::Up if self.primary == Some(i) => MemberRole::Primary,
                    MemberHealth::Up => MemberRole::Secondary,
                    MemberHealth::Stopped | MemberHealth::Killed => MemberRole::Down,
                    MemberHealth::Paused => MemberRole::Paused,
                    MemberHealth::Partitioned => MemberRole::Unreachable,
                };
                MemberState {
                    name: m.name.clone(),
                    role,
                    reachable: m.health == MemberHealth::Up,
                }
            })
            .collect()
    }
}

struct Inner {
    config: SimulatorConfig,
    state: RwLock<ClusterState>,
    collections: DashMap<String, HashMap<String, Value>>,
    changes: watch::Sender<u64>,
    stats: Mutex<SimulatorStats>,
}

/// A replica set of `member-1 .. member-N`, `member-1` primary at start.
#[derive(Clone)]
pub struct SimulatedReplicaSet {
    inner: Arc<Inner>,
}

impl Default for SimulatedReplicaSet {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedReplicaSet {
    pub fn new(config: SimulatorConfig) -> Self {
        let members = (1..=config.member_count.max(1))
            .map(|i| Member {
                name: format!("member-{}", i),
                health: MemberHealth::Up,
            })
            .collect();
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ClusterState {
                    members,
                    primary: Some(0),
                    term: 1,
                }),
                collections: DashMap::new(),
                changes,
                stats: Mutex::new(SimulatorStats::default()),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn TransactionalStore> {
        Arc::new(self.clone())
    }

    pub fn control(&self) -> Arc<dyn FaultControl> {
        Arc::new(self.clone())
    }

    pub fn member_names(&self) -> Vec<String> {
        self.inner
            .state
            .read()
            .members
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn health(&self, member: &str) -> Option<MemberHealth> {
        let state = self.inner.state.read();
        state.index_of(member).map(|i| state.members[i].health)
    }

    pub fn primary_name(&self) -> Option<String> {
        let state = self.inner.state.read();
        state.primary.map(|p| state.members[p].name.clone())
    }

    /// Committed documents of a collection, ordered by `_id`.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        let mut docs: Vec<(String, Value)> = self
            .inner
            .collections
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs.into_iter().map(|(_, v)| v).collect()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id).cloned())
    }

    pub fn stats(&self) -> SimulatorStats {
        self.inner.stats.lock().clone()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    fn notify(&self) {
        self.inner.changes.send_modify(|generation| *generation += 1);
    }

    fn set_health(&self, member: &str, health: MemberHealth) -> Result<()> {
        let elected = {
            let mut state = self.inner.state.write();
            let index = state
                .index_of(member)
                .ok_or_else(|| HarnessError::unknown_member(member))?;
            state.members[index].health = health;
            state
                .ensure_primary()
                .map(|p| (state.members[p].name.clone(), state.term))
        };
        info!("Member {} is now {:?}", member, health);
        if let Some((name, term)) = elected {
            self.inner.stats.lock().elections += 1;
            info!("Elected {} as primary for term {}", name, term);
        }
        self.notify();
        Ok(())
    }

    fn latency(&self) -> Duration {
        let min = self.inner.config.latency_min.as_millis() as u64;
        let max = self.inner.config.latency_max.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
    }

    async fn simulate_latency(&self) {
        let delay = self.latency();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn access(&self, pinned: usize, term: u64, during_commit: bool) -> Access {
        let state = self.inner.state.read();
        let member = &state.members[pinned];
        let network_label = if during_commit {
            UNKNOWN_COMMIT_RESULT
        } else {
            TRANSIENT
        };
        match member.health {
            MemberHealth::Stopped => Access::Failed(RawFailure::coded(
                91,
                "ShutdownInProgress",
                format!("{} is shutting down", member.name),
            )),
            MemberHealth::Killed => Access::Failed(
                RawFailure::coded(
                    6,
                    "HostUnreachable",
                    format!("connection to {} was reset", member.name),
                )
                .with_label(network_label),
            ),
            MemberHealth::Paused | MemberHealth::Partitioned => Access::WaitingForMember,
            MemberHealth::Up if state.primary != Some(pinned) || state.term != term => {
                Access::Failed(
                    RawFailure::coded(
                        10107,
                        "NotWritablePrimary",
                        format!("{} is no longer primary", member.name),
                    )
                    .with_label(TRANSIENT),
                )
            }
            MemberHealth::Up if during_commit && !state.has_majority() => {
                Access::WaitingForMajority
            }
            MemberHealth::Up => Access::Ready,
        }
    }
}

enum Access {
    Ready,
    WaitingForMember,
    WaitingForMajority,
    Failed(RawFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Operation,
    WriteConcern,
    Commit,
    Socket,
}

impl Expiry {
    fn failure(self, during_commit: bool) -> RawFailure {
        match self {
            Expiry::Operation => {
                RawFailure::coded(50, "MaxTimeMSExpired", "operation exceeded time limit")
            }
            Expiry::WriteConcern => RawFailure::coded(
                64,
                "WriteConcernFailed",
                "waiting for replication timed out",
            )
            .with_label(UNKNOWN_COMMIT_RESULT),
            Expiry::Commit => RawFailure::coded(
                262,
                "ExceededTimeLimit",
                "commitTransaction exceeded its time limit",
            )
            .with_label(UNKNOWN_COMMIT_RESULT),
            Expiry::Socket => {
                RawFailure::coded(89, "NetworkTimeout", "socket read timed out").with_label(
                    if during_commit {
                        UNKNOWN_COMMIT_RESULT
                    } else {
                        TRANSIENT
                    },
                )
            }
        }
    }
}

enum Wake {
    Changed,
    Expired(Expiry),
    Closed,
}

fn earliest(started: Instant, bounds: &[(Timeout, Expiry)]) -> Option<(Instant, Expiry)> {
    bounds
        .iter()
        .filter_map(|(timeout, expiry)| timeout.as_duration().map(|d| (started + d, *expiry)))
        .min_by_key(|(at, _)| *at)
}

async fn wait_for_change(
    changes: &mut watch::Receiver<u64>,
    deadline: Option<(Instant, Expiry)>,
) -> Wake {
    match deadline {
        Some((at, expiry)) => tokio::select! {
            changed = changes.changed() => match changed {
                Ok(()) => Wake::Changed,
                Err(_) => Wake::Closed,
            },
            _ = sleep_until(at) => Wake::Expired(expiry),
        },
        None => match changes.changed().await {
            Ok(()) => Wake::Changed,
            Err(_) => Wake::Closed,
        },
    }
}

fn closed() -> RawFailure {
    RawFailure::new("replica set simulator shut down")
}

fn key_of(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TransactionalStore for SimulatedReplicaSet {
    async fn begin(
        &self,
        collection: &str,
        options: TransactionOptions,
    ) -> std::result::Result<Box<dyn StoreTransaction>, RawFailure> {
        let started = Instant::now();
        let deadline = started + options.server_selection_timeout;
        let mut changes = self.subscribe();

        let (pinned, term) = loop {
            {
                let state = self.inner.state.read();
                if let Some(p) = state.primary {
                    if state.members[p].health == MemberHealth::Up {
                        break (p, state.term);
                    }
                }
            }
            let bound = Timeout::Bounded(options.server_selection_timeout);
            match wait_for_change(&mut changes, earliest(started, &[(bound, Expiry::Socket)]))
                .await
            {
                Wake::Changed => continue,
                Wake::Closed => return Err(closed()),
                Wake::Expired(_) => {
                    debug!("Server selection gave up at {:?}", deadline);
                    return Err(RawFailure::new(format!(
                        "server selection timed out after {:?}",
                        options.server_selection_timeout
                    ))
                    .with_name("ServerSelectionTimeout"));
                }
            }
        };

        self.inner.stats.lock().transactions_started += 1;
        debug!("Transaction on {} pinned to member #{} (term {})", collection, pinned + 1, term);

        Ok(Box::new(SimulatedTransaction {
            cluster: self.clone(),
            collection: collection.to_string(),
            options,
            pinned,
            term,
            staged: HashMap::new(),
            inserted: Vec::new(),
            commit_attempted: false,
            finished: false,
        }))
    }
}

struct SimulatedTransaction {
    cluster: SimulatedReplicaSet,
    collection: String,
    options: TransactionOptions,
    pinned: usize,
    term: u64,
    staged: HashMap<String, Value>,
    inserted: Vec<String>,
    commit_attempted: bool,
    finished: bool,
}

impl SimulatedTransaction {
    fn committed(&self, id: &str) -> Option<Value> {
        self.cluster.document(&self.collection, id)
    }

    fn stage(&mut self, operation: &Operation) -> std::result::Result<WriteAck, RawFailure> {
        match operation {
            Operation::Insert { document } => {
                let mut document = document.clone();
                let id = match document.get("_id") {
                    Some(id) => key_of(id),
                    None => {
                        let id = Uuid::new_v4().to_string();
                        if let Value::Object(fields) = &mut document {
                            fields.insert("_id".to_string(), Value::String(id.clone()));
                        }
                        id
                    }
                };
                if self.staged.contains_key(&id) || self.committed(&id).is_some() {
                    return Err(RawFailure::coded(
                        11000,
                        "DuplicateKey",
                        format!(
                            "E11000 duplicate key error collection: {} dup key: {{ _id: \"{}\" }}",
                            self.collection, id
                        ),
                    ));
                }
                self.staged.insert(id.clone(), document);
                self.inserted.push(id);
                Ok(WriteAck {
                    inserted: 1,
                    ..Default::default()
                })
            }
            Operation::Update { id, set } => {
                let id = key_of(id);
                let current = match self.staged.get(&id).cloned().or_else(|| self.committed(&id)) {
                    Some(doc) => doc,
                    None => return Ok(WriteAck::default()),
                };
                let mut updated = current.clone();
                if let (Value::Object(fields), Value::Object(changes)) = (&mut updated, set) {
                    for (field, value) in changes {
                        fields.insert(field.clone(), value.clone());
                    }
                }
                let modified = usize::from(updated != current);
                self.staged.insert(id, updated);
                Ok(WriteAck {
                    inserted: 0,
                    matched: 1,
                    modified,
                })
            }
        }
    }

    // Inserts that raced with another committed transaction fail the commit
    // as a write conflict; nothing is applied in that case.
    fn apply(&mut self) -> std::result::Result<(), RawFailure> {
        let mut collection = self
            .cluster
            .inner
            .collections
            .entry(self.collection.clone())
            .or_default();
        if let Some(id) = self.inserted.iter().find(|id| collection.contains_key(*id)) {
            return Err(RawFailure::coded(
                112,
                "WriteConflict",
                format!("write conflict on _id {}", id),
            )
            .with_label(TRANSIENT));
        }
        for (id, document) in self.staged.drain() {
            collection.insert(id, document);
        }
        self.inserted.clear();
        Ok(())
    }

    fn finished_failure(&self) -> RawFailure {
        RawFailure::coded(251, "NoSuchTransaction", "transaction is no longer active")
    }
}

#[async_trait]
impl StoreTransaction for SimulatedTransaction {
    async fn execute(
        &mut self,
        operation: &Operation,
        max_time: Timeout,
    ) -> std::result::Result<WriteAck, RawFailure> {
        if self.finished || self.commit_attempted {
            return Err(self.finished_failure());
        }
        let started = Instant::now();
        let bounds = [
            (max_time, Expiry::Operation),
            (self.options.socket_timeout, Expiry::Socket),
        ];
        let mut changes = self.cluster.subscribe();

        loop {
            match self.cluster.access(self.pinned, self.term, false) {
                Access::Ready | Access::WaitingForMajority => break,
                Access::Failed(failure) => return Err(failure),
                Access::WaitingForMember => {}
            }
            match wait_for_change(&mut changes, earliest(started, &bounds)).await {
                Wake::Changed => continue,
                Wake::Closed => return Err(closed()),
                Wake::Expired(expiry) => return Err(expiry.failure(false)),
            }
        }

        self.cluster.simulate_latency().await;
        let ack = self.stage(operation)?;
        self.cluster.inner.stats.lock().operations += 1;
        Ok(ack)
    }

    async fn commit(&mut self) -> std::result::Result<(), RawFailure> {
        if self.finished || self.commit_attempted {
            return Err(self.finished_failure());
        }
        self.commit_attempted = true;
        let started = Instant::now();
        let member_bounds = [
            (self.options.commit_timeout, Expiry::Commit),
            (self.options.socket_timeout, Expiry::Socket),
        ];
        let majority_bounds = [
            (self.options.write_concern.timeout(), Expiry::WriteConcern),
            (self.options.commit_timeout, Expiry::Commit),
            (self.options.socket_timeout, Expiry::Socket),
        ];
        let mut changes = self.cluster.subscribe();

        loop {
            let bounds: &[(Timeout, Expiry)] = match self.cluster.access(self.pinned, self.term, true)
            {
                Access::Ready => break,
                Access::Failed(failure) => return Err(failure),
                Access::WaitingForMember => &member_bounds,
                Access::WaitingForMajority => &majority_bounds,
            };
            match wait_for_change(&mut changes, earliest(started, bounds)).await {
                Wake::Changed => continue,
                Wake::Closed => return Err(closed()),
                Wake::Expired(Expiry::WriteConcern) => {
                    // Applied on the primary, replication unconfirmed.
                    self.apply()?;
                    self.finished = true;
                    warn!(
                        "Commit on {} applied locally without majority acknowledgment",
                        self.collection
                    );
                    return Err(Expiry::WriteConcern.failure(true));
                }
                Wake::Expired(expiry) => return Err(expiry.failure(true)),
            }
        }

        self.cluster.simulate_latency().await;
        self.apply()?;
        self.finished = true;
        self.cluster.inner.stats.lock().commits += 1;
        Ok(())
    }

    async fn abort(&mut self) -> std::result::Result<(), RawFailure> {
        if self.commit_attempted {
            return Err(RawFailure::new(
                "cannot call abortTransaction after calling commitTransaction",
            ));
        }
        if self.finished {
            return Ok(());
        }
        let started = Instant::now();
        let bounds = [(self.options.socket_timeout, Expiry::Socket)];
        let mut changes = self.cluster.subscribe();

        loop {
            match self.cluster.access(self.pinned, self.term, false) {
                Access::Ready | Access::WaitingForMajority => break,
                // The transaction died with the old primary's term.
                Access::Failed(failure) if failure.code == Some(10107) => break,
                Access::Failed(failure) => return Err(failure),
                Access::WaitingForMember => {}
            }
            match wait_for_change(&mut changes, earliest(started, &bounds)).await {
                Wake::Changed => continue,
                Wake::Closed => return Err(closed()),
                Wake::Expired(expiry) => return Err(expiry.failure(false)),
            }
        }

        self.staged.clear();
        self.inserted.clear();
        self.finished = true;
        self.cluster.inner.stats.lock().aborts += 1;
        Ok(())
    }
}

#[async_trait]
impl FaultControl for SimulatedReplicaSet {
    async fn stop(&self, member: &str) -> Result<()> {
        self.set_health(member, MemberHealth::Stopped)
    }

    async fn kill(&self, member: &str) -> Result<()> {
        self.set_health(member, MemberHealth::Killed)
    }

    async fn pause(&self, member: &str) -> Result<()> {
        self.set_health(member, MemberHealth::Paused)
    }

    async fn partition(&self, members: &[String]) -> Result<()> {
        for member in members {
            self.set_health(member, MemberHealth::Partitioned)?;
        }
        Ok(())
    }

    async fn restore(&self, members: &[String]) -> Result<()> {
        for member in members {
            self.set_health(member, MemberHealth::Up)?;
        }
        Ok(())
    }

    async fn step_down(&self, member: &str) -> Result<()> {
        let (elected, term) = {
            let mut state = self.inner.state.write();
            let index = state
                .index_of(member)
                .ok_or_else(|| HarnessError::unknown_member(member))?;
            if state.primary != Some(index) || state.members[index].health != MemberHealth::Up {
                return Err(HarnessError::control(member, "not the current primary"));
            }
            let candidate = state
                .members
                .iter()
                .enumerate()
                .position(|(i, m)| i != index && m.health == MemberHealth::Up)
                .ok_or_else(|| HarnessError::control(member, "no electable secondary"))?;
            state.primary = Some(candidate);
            state.term += 1;
            (state.members[candidate].name.clone(), state.term)
        };
        self.inner.stats.lock().elections += 1;
        info!("{} stepped down, {} is primary for term {}", member, elected, term);
        self.notify();
        Ok(())
    }

    async fn wait_healthy(&self, member: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        let bounds = [(Timeout::Bounded(timeout), Expiry::Socket)];
        let mut changes = self.subscribe();
        loop {
            match self.health(member) {
                Some(MemberHealth::Up) => return true,
                None => return false,
                Some(_) => {}
            }
            match wait_for_change(&mut changes, earliest(started, &bounds)).await {
                Wake::Changed => continue,
                Wake::Expired(_) | Wake::Closed => return false,
            }
        }
    }

    async fn current_topology(&self) -> Result<Vec<MemberState>> {
        Ok(self.inner.state.read().snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txfault_core::{TimeoutPolicy, TopologyView};

    fn insert(id: &str) -> Operation {
        Operation::Insert {
            document: json!({ "_id": id, "n": 1 }),
        }
    }

    fn options(policy: &TimeoutPolicy) -> TransactionOptions {
        TransactionOptions::from_policy(policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_applies_staged_writes_atomically() {
        let sim = SimulatedReplicaSet::default();
        let policy = TimeoutPolicy::bounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();

        txn.execute(&insert("a"), policy.operation_timeout()).await.unwrap();
        let update = Operation::Update {
            id: json!("a"),
            set: json!({ "n": 2 }),
        };
        let ack = txn.execute(&update, policy.operation_timeout()).await.unwrap();
        assert_eq!((ack.matched, ack.modified), (1, 1));
        assert!(sim.documents("c").is_empty());

        txn.commit().await.unwrap();
        assert_eq!(sim.document("c", "a"), Some(json!({ "_id": "a", "n": 2 })));
        assert_eq!(sim.stats().commits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_is_rejected() {
        let sim = SimulatedReplicaSet::default();
        let policy = TimeoutPolicy::bounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();
        txn.execute(&insert("a"), Timeout::Unbounded).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = sim.begin("c", options(&policy)).await.unwrap();
        let err = txn.execute(&insert("a"), Timeout::Unbounded).await.unwrap_err();
        assert_eq!(err.code, Some(11000));
        assert!(!err.retryable_label_present);
        txn.abort().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_topology() {
        let sim = SimulatedReplicaSet::default();
        let topology = sim.current_topology().await.unwrap();
        assert_eq!(topology.len(), 3);
        assert_eq!(topology.primary().map(|m| m.name.as_str()), Some("member-1"));
        assert_eq!(topology.reachable_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_primary_elects_and_fails_pinned_transaction() {
        let sim = SimulatedReplicaSet::default();
        let policy = TimeoutPolicy::bounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();

        sim.stop("member-1").await.unwrap();
        assert_eq!(sim.primary_name().as_deref(), Some("member-2"));
        assert_eq!(sim.stats().elections, 1);

        let err = txn.execute(&insert("a"), Timeout::millis(100)).await.unwrap_err();
        assert_eq!(err.symbolic_name.as_deref(), Some("ShutdownInProgress"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_primary_bounded_by_operation_timeout() {
        let sim = SimulatedReplicaSet::new(SimulatorConfig::default().with_member_count(1));
        let policy = TimeoutPolicy::bounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();

        sim.pause("member-1").await.unwrap();
        let started = Instant::now();
        let err = txn
            .execute(&insert("a"), policy.operation_timeout())
            .await
            .unwrap_err();
        assert_eq!(err.code, Some(50));
        assert!(started.elapsed() >= TimeoutPolicy::BOUNDED_OPERATION_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_commit_waits_for_majority() {
        let sim = SimulatedReplicaSet::default();
        let policy = TimeoutPolicy::unbounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();
        txn.execute(&insert("a"), Timeout::Unbounded).await.unwrap();

        sim.pause("member-2").await.unwrap();
        sim.partition(&["member-3".to_string()]).await.unwrap();

        let handle = tokio::spawn(async move { txn.commit().await });
        sleep(Duration::from_secs(3600)).await;
        assert!(!handle.is_finished());

        sim.restore(&sim.member_names()).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
        assert!(sim.document("c", "a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_majority_fails_write_concern_first() {
        let sim = SimulatedReplicaSet::default();
        let policy = TimeoutPolicy::bounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();
        txn.execute(&insert("a"), policy.operation_timeout()).await.unwrap();

        sim.stop("member-2").await.unwrap();
        sim.stop("member-3").await.unwrap();
        assert_eq!(sim.primary_name().as_deref(), Some("member-1"));

        let err = txn.commit().await.unwrap_err();
        assert_eq!(err.code, Some(64));
        assert!(err.has_label(UNKNOWN_COMMIT_RESULT));
        // Applied on the primary even though replication was not confirmed.
        assert!(sim.document("c", "a").is_some());
        assert!(txn.abort().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_down_moves_primary() {
        let sim = SimulatedReplicaSet::default();
        let policy = TimeoutPolicy::bounded();
        let mut txn = sim.begin("c", options(&policy)).await.unwrap();

        assert!(sim.step_down("member-2").await.is_err());
        sim.step_down("member-1").await.unwrap();
        assert_eq!(sim.primary_name().as_deref(), Some("member-2"));

        let err = txn.execute(&insert("a"), Timeout::millis(100)).await.unwrap_err();
        assert_eq!(err.code, Some(10107));
        assert!(err.retryable_label_present);
        txn.abort().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_healthy() {
        let sim = SimulatedReplicaSet::default();
        sim.kill("member-3").await.unwrap();
        assert!(!sim.wait_healthy("member-3", Duration::from_secs(1)).await);
        assert!(!sim.wait_healthy("member-9", Duration::from_secs(1)).await);

        sim.restore(&["member-3".to_string()]).await.unwrap();
        assert!(sim.wait_healthy("member-3", Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_selection_times_out_without_primary() {
        let sim = SimulatedReplicaSet::new(SimulatorConfig::default().with_member_count(1));
        sim.kill("member-1").await.unwrap();

        let err = sim
            .begin("c", options(&TimeoutPolicy::bounded()))
            .await
            .err()
            .expect("no primary to select");
        assert_eq!(err.symbolic_name.as_deref(), Some("ServerSelectionTimeout"));
    }

    #[tokio::test]
    async fn test_unknown_member_is_rejected() {
        let sim = SimulatedReplicaSet::default();
        assert!(matches!(
            sim.stop("member-7").await,
            Err(HarnessError::UnknownMember { .. })
        ));
    }
}
