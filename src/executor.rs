//! Single submission point towards the transport.
//!
//! Maps raw result pages onto [`ResultMeta`] and paginated [`Records`],
//! turns failed guards into constraint errors, and reacts to schema faults by
//! invalidating the metadata and statement caches. Faults are always surfaced
//! to the caller; nothing is retried here.

use crate::batch::Batch;
use crate::catalog::MetadataCatalog;
use crate::compiler::{CompiledStatement, Guard};
use crate::error::DaoError;
use crate::records::Records;
use crate::statement_cache::StatementCache;
use crate::transport::{
    ExecutionInfo, Request, ResultPage, StatementOptions, Transport, TransportError,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a submission: whether its guard held, plus one
/// [`ExecutionInfo`] per round trip (pages included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMeta {
    applied: bool,
    execution_info: Vec<ExecutionInfo>,
}

impl Default for ResultMeta {
    fn default() -> Self {
        Self {
            applied: true,
            execution_info: Vec::new(),
        }
    }
}

impl ResultMeta {
    pub(crate) fn from_page(page: &ResultPage) -> Self {
        Self {
            applied: page.applied(),
            execution_info: vec![page.execution_info.clone()],
        }
    }

    pub fn was_applied(&self) -> bool {
        self.applied
    }

    pub fn execution_info(&self) -> &[ExecutionInfo] {
        &self.execution_info
    }

    pub(crate) fn record_page(&mut self, page: &ResultPage) {
        self.execution_info.push(page.execution_info.clone());
    }
}

/// Something the executor can send in one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Statement(CompiledStatement),
    Batch(Batch),
}

impl Submission {
    fn request(&self) -> Request {
        match self {
            Submission::Statement(statement) => Request::Statement(statement.to_wire()),
            Submission::Batch(batch) => batch.to_request(),
        }
    }

    fn options(&self) -> &StatementOptions {
        match self {
            Submission::Statement(statement) => statement.options(),
            Submission::Batch(batch) => batch.options(),
        }
    }

    fn guard(&self) -> Guard {
        match self {
            Submission::Statement(statement) => statement.guard(),
            Submission::Batch(batch) => batch.guard(),
        }
    }
}

impl From<CompiledStatement> for Submission {
    fn from(statement: CompiledStatement) -> Self {
        Submission::Statement(statement)
    }
}

impl From<Batch> for Submission {
    fn from(batch: Batch) -> Self {
        Submission::Batch(batch)
    }
}

#[derive(Clone)]
pub struct AsyncExecutor {
    transport: Arc<dyn Transport>,
    catalog: MetadataCatalog,
    statements: StatementCache,
}

impl AsyncExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        catalog: MetadataCatalog,
        statements: StatementCache,
    ) -> Self {
        Self {
            transport,
            catalog,
            statements,
        }
    }

    /// Sends a mutation or batch. A guarded submission that was not applied
    /// fails with the guard's constraint message.
    pub async fn submit(&self, submission: impl Into<Submission>) -> Result<ResultMeta, DaoError> {
        let submission = submission.into();
        let page = self
            .dispatch(&submission.request(), submission.options())
            .await?;
        let meta = ResultMeta::from_page(&page);
        if !meta.was_applied()
            && let Some(message) = submission.guard().rejection_message()
        {
            debug!(guard = ?submission.guard(), "guarded mutation not applied");
            return Err(DaoError::Constraint(message.to_string()));
        }
        Ok(meta)
    }

    /// Runs a read and returns its lazily paginated rows.
    pub async fn query(&self, statement: CompiledStatement) -> Result<Records, DaoError> {
        let statement = Arc::new(statement);
        let page = self.fetch_page(&statement, None).await?;
        Ok(Records::new(self.clone(), statement, page))
    }

    pub(crate) async fn fetch_page(
        &self,
        statement: &CompiledStatement,
        paging_state: Option<Bytes>,
    ) -> Result<ResultPage, DaoError> {
        let mut options = statement.options().clone();
        let continuation = paging_state.is_some();
        options.paging_state = paging_state;
        let page = self
            .dispatch(&Request::Statement(statement.to_wire()), &options)
            .await?;
        debug!(
            table = %statement.table(),
            rows = page.rows.len(),
            continuation,
            has_more = page.paging_state.is_some(),
            "page fetched"
        );
        Ok(page)
    }

    async fn dispatch(
        &self,
        request: &Request,
        options: &StatementOptions,
    ) -> Result<ResultPage, DaoError> {
        match self.transport.execute(request, options).await {
            Ok(page) => Ok(page),
            Err(err) => {
                if err.is_schema_fault() {
                    self.invalidate_caches(&err);
                } else {
                    warn!(error = %err, statements = request.statement_count(), "transport fault");
                }
                Err(DaoError::Transport(err))
            }
        }
    }

    fn invalidate_caches(&self, err: &TransportError) {
        if self.catalog.invalidate_all() {
            self.statements.invalidate_all();
            warn!(error = %err, "schema fault, prepared statements dropped");
        }
    }
}
