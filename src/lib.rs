pub mod batch;
mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod constraints;
pub mod dao;
pub mod error;
pub mod executor;
pub mod interceptor;
pub mod query;
pub mod records;
pub mod statement_cache;
pub mod sync_bridge;
#[cfg(test)]
mod test_support;
pub mod transport;

use crate::catalog::MetadataCatalog;
use crate::catalog::schema::TableIdentity;
use crate::compiler::StatementCompiler;
use crate::statement_cache::StatementCache;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

pub use crate::batch::{Batch, BatchAssembler, BatchKind};
pub use crate::catalog::types::{CqlValue, IntoValue, UdtValue, Value, lit};
pub use crate::compiler::{CompiledStatement, Guard, StatementKind};
pub use crate::config::EngineConfig;
pub use crate::constraints::ConstraintsInterceptor;
pub use crate::dao::{BatchMutation, CounterMutation, Dao, Deletion, ListRead, SingleRead, Write};
pub use crate::error::{DaoError, DaoErrorCode, RecordDecodeError};
pub use crate::executor::{AsyncExecutor, ResultMeta, Submission};
pub use crate::interceptor::{
    Batchable, CascadeOnDeleteInterceptor, CascadeOnWriteInterceptor, DeleteRequestInterceptor,
    InterceptorRegistry, ReadRequestInterceptor, ReadResponseInterceptor,
    WriteRequestInterceptor,
};
pub use crate::query::{Clause, ExecutionContext, col};
pub use crate::records::{FromCqlValue, Record, Records, TryFromRecord};
pub use crate::transport::{Consistency, Transport, TransportError};

const NO_RUNTIME: &str =
    "blocking execution needs a tokio runtime; build the engine with Engine::with_runtime";

/// Entry point: owns the metadata catalog, the prepared statement cache and
/// the executor, all shared by every [`Dao`] it hands out.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    catalog: MetadataCatalog,
    statements: StatementCache,
    compiler: StatementCompiler,
    executor: AsyncExecutor,
    runtime: Option<Handle>,
}

impl Engine {
    /// Builds an engine over `transport`. When called inside a tokio runtime
    /// that runtime also drives blocking executions.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self, DaoError> {
        Self::build(transport, config, Handle::try_current().ok())
    }

    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        runtime: Handle,
    ) -> Result<Self, DaoError> {
        Self::build(transport, config, Some(runtime))
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        runtime: Option<Handle>,
    ) -> Result<Self, DaoError> {
        config.validate()?;
        let catalog = MetadataCatalog::new(Arc::clone(&transport), &config);
        let statements =
            StatementCache::new(Arc::clone(&transport), config.statement_cache_capacity);
        let compiler = StatementCompiler::new(catalog.clone(), statements.clone());
        let executor = AsyncExecutor::new(transport, catalog.clone(), statements.clone());
        info!(
            default_keyspace = config.default_keyspace.as_deref().unwrap_or("-"),
            metadata_expiry_ms = config.metadata_expiry_ms,
            statement_cache_capacity = config.statement_cache_capacity,
            blocking_runtime = runtime.is_some(),
            "engine ready"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                catalog,
                statements,
                compiler,
                executor,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.inner.catalog
    }

    pub fn statements(&self) -> &StatementCache {
        &self.inner.statements
    }

    pub fn compiler(&self) -> &StatementCompiler {
        &self.inner.compiler
    }

    pub fn executor(&self) -> &AsyncExecutor {
        &self.inner.executor
    }

    /// DAO for `keyspace.table`, or a bare table in the default keyspace.
    pub fn dao(&self, name: &str) -> Result<Dao, DaoError> {
        let table = TableIdentity::parse(name, self.inner.config.default_keyspace.as_deref())?;
        Ok(self.dao_for(table))
    }

    pub fn dao_for(&self, table: TableIdentity) -> Dao {
        Dao::new(self.clone(), table)
    }

    pub(crate) fn runtime(&self) -> Result<Handle, DaoError> {
        self.inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| DaoError::InvalidConfig {
                message: NO_RUNTIME.into(),
            })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("default_keyspace", &self.inner.config.default_keyspace)
            .field("cached_tables", &self.inner.catalog.cached_table_count())
            .finish()
    }
}
