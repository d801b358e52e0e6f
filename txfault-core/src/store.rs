//! # Storage Engine Interface
//!
//! The replicated store is a black box. The harness only needs to open a
//! transaction with given read/write concern and timeout settings, issue
//! writes, commit and abort. Every call may block for as long as the
//! configured timeouts allow, forever included.

use crate::{Operation, RawFailure, Timeout, TimeoutPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Read concern applied inside transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConcern {
    /// Strongest consistency level available to a transaction
    Snapshot,
}

/// Acknowledgment level required before a commit is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteConcern {
    /// Acknowledged by more than half of the voting members
    Majority { timeout: Timeout },
}

impl WriteConcern {
    pub fn timeout(&self) -> Timeout {
        match self {
            WriteConcern::Majority { timeout } => *timeout,
        }
    }
}

/// Everything the store needs to know to run one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
    pub commit_timeout: Timeout,
    pub socket_timeout: Timeout,
    pub server_selection_timeout: Duration,
}

impl TransactionOptions {
    /// Snapshot read concern and majority write concern, with every timeout
    /// taken from the policy.
    pub fn from_policy(policy: &TimeoutPolicy) -> Self {
        Self {
            read_concern: ReadConcern::Snapshot,
            write_concern: WriteConcern::Majority {
                timeout: policy.write_concern_timeout(),
            },
            commit_timeout: policy.commit_timeout(),
            socket_timeout: policy.socket_timeout(),
            server_selection_timeout: policy.server_selection_timeout(),
        }
    }
}

/// Acknowledgment for a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteAck {
    pub inserted: usize,
    pub matched: usize,
    pub modified: usize,
}

/// A store that can open transactions on a fresh session.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Opens a new session and starts a transaction on it.
    async fn begin(
        &self,
        collection: &str,
        options: TransactionOptions,
    ) -> Result<Box<dyn StoreTransaction>, RawFailure>;
}

/// An open transaction. One session, strictly sequential use.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Issues one write. `max_time` is enforced by the engine.
    async fn execute(&mut self, operation: &Operation, max_time: Timeout)
        -> Result<WriteAck, RawFailure>;

    /// Commits with the commit timeout and write concern given at begin.
    async fn commit(&mut self) -> Result<(), RawFailure>;

    async fn abort(&mut self) -> Result<(), RawFailure>;
}
