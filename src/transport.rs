//! Boundary to the upstream store driver.
//!
//! The engine never speaks the wire protocol itself. It hands fully compiled
//! requests to a [`Transport`] and receives result pages, prepared handles and
//! schema descriptions back.

use crate::batch::BatchKind;
use crate::catalog::schema::{TableIdentity, TableSchema, UdtDef};
use crate::catalog::types::CqlValue;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Column carrying the guard outcome of a conditional mutation.
pub const APPLIED_COLUMN: &str = "[applied]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        }
    }

    pub fn is_serial(self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options passed through to the driver untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementOptions {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub tracing: bool,
    pub fetch_size: Option<u32>,
    pub paging_state: Option<Bytes>,
}

/// Opaque handle to a statement prepared on the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedStatement {
    pub id: Bytes,
    pub query: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryBody {
    Text(Arc<str>),
    Prepared(PreparedStatement),
}

impl QueryBody {
    pub fn query_text(&self) -> &str {
        match self {
            QueryBody::Text(text) => text,
            QueryBody::Prepared(prepared) => &prepared.query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireStatement {
    pub body: QueryBody,
    pub values: Vec<CqlValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Statement(WireStatement),
    Batch {
        kind: BatchKind,
        statements: Vec<WireStatement>,
    },
}

impl Request {
    pub fn statement_count(&self) -> usize {
        match self {
            Request::Statement(_) => 1,
            Request::Batch { statements, .. } => statements.len(),
        }
    }
}

/// Coordinator-side details of one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub coordinator: Option<String>,
    pub tracing_id: Option<Uuid>,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

/// One page of a response. Mutations return an empty page, or a single
/// `[applied]` row when they carried a guard condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CqlValue>>,
    pub paging_state: Option<Bytes>,
    pub execution_info: ExecutionInfo,
}

impl ResultPage {
    pub fn applied(&self) -> bool {
        if self.columns.first().map(String::as_str) != Some(APPLIED_COLUMN) {
            return true;
        }
        self.rows
            .first()
            .and_then(|row| row.first())
            .and_then(CqlValue::as_bool)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("driver internal error: {0}")]
    Internal(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Faults that usually mean cached schema or prepared statements went stale.
    pub fn is_schema_fault(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidQuery(_) | TransportError::Internal(_)
        )
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(
        &self,
        request: &Request,
        options: &StatementOptions,
    ) -> Result<ResultPage, TransportError>;

    async fn prepare(&self, query: &str) -> Result<PreparedStatement, TransportError>;

    /// `Ok(None)` when the table does not exist.
    async fn describe_table(
        &self,
        table: &TableIdentity,
    ) -> Result<Option<TableSchema>, TransportError>;

    /// `Ok(None)` when the type does not exist.
    async fn describe_type(
        &self,
        keyspace: &str,
        name: &str,
    ) -> Result<Option<UdtDef>, TransportError>;
}
