use crate::catalog::schema::{TableIdentity, TableSchema, UdtDef};
use crate::transport::{
    PreparedStatement, Request, ResultPage, StatementOptions, Transport, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Transport double: serves registered schemas, answers executions from a
/// script and records everything it was asked to do.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    tables: parking_lot::Mutex<HashMap<TableIdentity, TableSchema>>,
    udts: parking_lot::Mutex<HashMap<(String, String), UdtDef>>,
    responses: parking_lot::Mutex<VecDeque<Result<ResultPage, TransportError>>>,
    executed: parking_lot::Mutex<Vec<(Request, StatementOptions)>>,
    prepare_delay: parking_lot::Mutex<Option<Duration>>,
    describe_table_calls: AtomicUsize,
    prepare_calls: AtomicUsize,
    fail_describe: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, schema: TableSchema) -> Self {
        self.tables.lock().insert(schema.identity.clone(), schema);
        self
    }

    pub fn with_udt(self, udt: UdtDef) -> Self {
        self.udts
            .lock()
            .insert((udt.keyspace.clone(), udt.name.clone()), udt);
        self
    }

    pub fn with_prepare_delay(self, delay: Duration) -> Self {
        *self.prepare_delay.lock() = Some(delay);
        self
    }

    pub fn push_response(&self, response: Result<ResultPage, TransportError>) {
        self.responses.lock().push_back(response);
    }

    pub fn fail_describe(&self, fail: bool) {
        self.fail_describe.store(fail, Ordering::SeqCst);
    }

    pub fn describe_table_calls(&self) -> usize {
        self.describe_table_calls.load(Ordering::SeqCst)
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<(Request, StatementOptions)> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &Request,
        options: &StatementOptions,
    ) -> Result<ResultPage, TransportError> {
        self.executed
            .lock()
            .push((request.clone(), options.clone()));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ResultPage::default()))
    }

    async fn prepare(&self, query: &str) -> Result<PreparedStatement, TransportError> {
        let n = self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.prepare_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(PreparedStatement {
            id: Bytes::from(format!("stmt-{n}")),
            query: query.into(),
        })
    }

    async fn describe_table(
        &self,
        table: &TableIdentity,
    ) -> Result<Option<TableSchema>, TransportError> {
        self.describe_table_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("describe failed".into()));
        }
        Ok(self.tables.lock().get(table).cloned())
    }

    async fn describe_type(
        &self,
        keyspace: &str,
        name: &str,
    ) -> Result<Option<UdtDef>, TransportError> {
        Ok(self
            .udts
            .lock()
            .get(&(keyspace.to_string(), name.to_string()))
            .cloned())
    }
}
