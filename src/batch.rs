//! Merges compiled mutations into one atomic batch.

use crate::compiler::{CompiledStatement, Guard};
use crate::error::DaoError;
use crate::query::spec::ExecutionContext;
use crate::transport::{Request, StatementOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchKind {
    Logged,
    Unlogged,
    Counter,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Logged => "LOGGED",
            BatchKind::Unlogged => "UNLOGGED",
            BatchKind::Counter => "COUNTER",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    kind: BatchKind,
    statements: Vec<CompiledStatement>,
    options: StatementOptions,
}

impl Batch {
    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn statements(&self) -> &[CompiledStatement] {
        &self.statements
    }

    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// First guarded member; a conditional batch applies or fails as a whole.
    pub fn guard(&self) -> Guard {
        self.statements
            .iter()
            .map(CompiledStatement::guard)
            .find(|guard| *guard != Guard::None)
            .unwrap_or(Guard::None)
    }

    pub fn to_request(&self) -> Request {
        Request::Batch {
            kind: self.kind,
            statements: self.statements.iter().map(CompiledStatement::to_wire).collect(),
        }
    }
}

pub struct BatchAssembler;

impl BatchAssembler {
    /// Builds a batch from `statements` in order.
    ///
    /// Counter members force a counter batch and may not be mixed with
    /// ordinary mutations; `kind` overrides the default logged kind of
    /// ordinary batches. Context options apply to the whole batch.
    pub fn assemble(
        statements: Vec<CompiledStatement>,
        kind: Option<BatchKind>,
        ctx: &ExecutionContext,
    ) -> Result<Batch, DaoError> {
        if statements.is_empty() {
            return Err(DaoError::Validation("batch has no statements".into()));
        }
        if let Some(read) = statements.iter().find(|s| !s.is_mutation()) {
            return Err(DaoError::Validation(format!(
                "read statement on {} can not be batched",
                read.table()
            )));
        }
        let counters = statements.iter().filter(|s| s.is_counter()).count();
        let kind = if counters == statements.len() {
            match kind {
                None | Some(BatchKind::Counter) => BatchKind::Counter,
                Some(other) => {
                    return Err(DaoError::Validation(format!(
                        "counter mutations require a COUNTER batch, not {other}"
                    )));
                }
            }
        } else if counters > 0 {
            return Err(DaoError::Validation(
                "counter and non-counter mutations can not be combined in one batch".into(),
            ));
        } else {
            match kind {
                Some(BatchKind::Counter) => {
                    return Err(DaoError::Validation(
                        "COUNTER batch can only contain counter mutations".into(),
                    ));
                }
                Some(kind) => kind,
                None => BatchKind::Logged,
            }
        };

        tracing::debug!(kind = %kind, statements = statements.len(), "batch assembled");
        Ok(Batch {
            kind,
            statements,
            options: ctx.statement_options(),
        })
    }
}
