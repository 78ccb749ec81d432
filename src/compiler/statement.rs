use crate::catalog::schema::TableIdentity;
use crate::catalog::types::CqlValue;
use crate::transport::{PreparedStatement, QueryBody, StatementOptions, WireStatement};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Counter,
    Select,
}

/// Server-side condition a mutation carries, deciding how "not applied" is
/// reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    None,
    IfNotExists,
    IfExists,
    OnlyIf,
}

impl Guard {
    /// Message of the constraint error raised when the guard did not hold.
    pub fn rejection_message(self) -> Option<&'static str> {
        match self {
            Guard::None => None,
            Guard::IfNotExists => Some("duplicated entry"),
            Guard::IfExists => Some("entry does not exist"),
            Guard::OnlyIf => Some("if condition does not match"),
        }
    }
}

/// Statement text, bound values and options, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledStatement {
    pub(crate) table: TableIdentity,
    pub(crate) kind: StatementKind,
    pub(crate) guard: Guard,
    pub(crate) text: Arc<str>,
    pub(crate) values: Vec<CqlValue>,
    pub(crate) prepared: Option<PreparedStatement>,
    pub(crate) options: StatementOptions,
    pub(crate) ttl: Option<Duration>,
}

impl CompiledStatement {
    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn guard(&self) -> Guard {
        self.guard
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn is_counter(&self) -> bool {
        self.kind == StatementKind::Counter
    }

    pub fn is_mutation(&self) -> bool {
        self.kind != StatementKind::Select
    }

    pub fn to_wire(&self) -> WireStatement {
        let body = match &self.prepared {
            Some(prepared) => QueryBody::Prepared(prepared.clone()),
            None => QueryBody::Text(Arc::clone(&self.text)),
        };
        WireStatement {
            body,
            values: self.values.clone(),
        }
    }
}
