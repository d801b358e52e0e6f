//! Scripted store used by this crate's unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use txfault_core::{
    Operation, OperationKind, RawFailure, StoreTransaction, Timeout, TransactionOptions,
    TransactionalStore, WriteAck,
};

#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail(RawFailure),
    Hang,
}

impl Reply {
    async fn resolve(self) -> Result<(), RawFailure> {
        match self {
            Reply::Ok => Ok(()),
            Reply::Fail(failure) => Err(failure),
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct Script {
    begin: Option<Reply>,
    operations: HashMap<usize, Reply>,
    commit: Option<Reply>,
    abort: Option<Reply>,
    calls: Vec<String>,
    max_times: Vec<Timeout>,
    options: Option<TransactionOptions>,
    issued: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedStore {
    script: Arc<Mutex<Script>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn TransactionalStore> {
        Arc::new(self.clone())
    }

    pub fn with_begin_reply(self, reply: Reply) -> Self {
        self.script.lock().begin = Some(reply);
        self
    }

    pub fn with_operation_reply(self, index: usize, reply: Reply) -> Self {
        self.script.lock().operations.insert(index, reply);
        self
    }

    pub fn with_commit_reply(self, reply: Reply) -> Self {
        self.script.lock().commit = Some(reply);
        self
    }

    pub fn with_abort_reply(self, reply: Reply) -> Self {
        self.script.lock().abort = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn max_times(&self) -> Vec<Timeout> {
        self.script.lock().max_times.clone()
    }

    pub fn last_options(&self) -> Option<TransactionOptions> {
        self.script.lock().options.clone()
    }

    fn record(&self, call: &str) {
        self.script.lock().calls.push(call.to_string());
    }
}

#[async_trait]
impl TransactionalStore for ScriptedStore {
    async fn begin(
        &self,
        _collection: &str,
        options: TransactionOptions,
    ) -> Result<Box<dyn StoreTransaction>, RawFailure> {
        self.record("begin");
        let reply = {
            let mut script = self.script.lock();
            script.options = Some(options);
            script.begin.clone().unwrap_or(Reply::Ok)
        };
        reply.resolve().await?;
        Ok(Box::new(ScriptedTransaction {
            store: self.clone(),
        }))
    }
}

struct ScriptedTransaction {
    store: ScriptedStore,
}

#[async_trait]
impl StoreTransaction for ScriptedTransaction {
    async fn execute(
        &mut self,
        operation: &Operation,
        max_time: Timeout,
    ) -> Result<WriteAck, RawFailure> {
        let kind = operation.kind();
        self.store.record(&kind.to_string());
        let reply = {
            let mut script = self.store.script.lock();
            script.max_times.push(max_time);
            let index = script.issued;
            script.issued += 1;
            script.operations.get(&index).cloned().unwrap_or(Reply::Ok)
        };
        reply.resolve().await?;
        Ok(match kind {
            OperationKind::Insert => WriteAck {
                inserted: 1,
                ..Default::default()
            },
            OperationKind::Update => WriteAck {
                matched: 1,
                modified: 1,
                ..Default::default()
            },
        })
    }

    async fn commit(&mut self) -> Result<(), RawFailure> {
        self.store.record("commit");
        let reply = self.store.script.lock().commit.clone().unwrap_or(Reply::Ok);
        reply.resolve().await
    }

    async fn abort(&mut self) -> Result<(), RawFailure> {
        self.store.record("abort");
        let reply = self.store.script.lock().abort.clone().unwrap_or(Reply::Ok);
        reply.resolve().await
    }
}
