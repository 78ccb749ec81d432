//! Fluent surface over the engine.
//!
//! A [`Dao`] is bound to one table and carries default execution options and
//! interceptors. Its builders ([`Write`], [`CounterMutation`], [`Deletion`],
//! [`SingleRead`], [`ListRead`], [`BatchMutation`]) are immutable values;
//! each offers `execute()` and a blocking `execute_blocking()` over the same
//! pipeline.

use crate::Engine;
use crate::batch::{BatchAssembler, BatchKind};
use crate::catalog::schema::TableIdentity;
use crate::catalog::types::IntoValue;
use crate::constraints::ConstraintsInterceptor;
use crate::error::DaoError;
use crate::executor::ResultMeta;
use crate::interceptor::{
    Batchable, CascadeOnDeleteInterceptor, CascadeOnWriteInterceptor, DeleteRequestInterceptor,
    InterceptorRegistry, ReadRequestInterceptor, ReadResponseInterceptor,
    WriteRequestInterceptor,
};
use crate::query::clause::Clause;
use crate::query::spec::{
    CounterSpec, DeleteSpec, ExecutionContext, MutationSpec, ReadCardinality, ReadSpec,
    WriteSpec,
};
use crate::records::{Record, Records, TryFromRecord};
use crate::sync_bridge::block_on_engine;
use crate::transport::Consistency;
use im::Vector;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cascades may produce mutations whose own interceptors cascade again; the
/// chain is cut off at this depth.
const MAX_CASCADE_DEPTH: usize = 8;

macro_rules! execution_options {
    () => {
        pub fn with_consistency(mut self, consistency: Consistency) -> Self {
            self.ctx = self.ctx.with_consistency(consistency);
            self
        }

        pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
            self.ctx = self.ctx.with_serial_consistency(consistency);
            self
        }

        pub fn with_tracking(mut self) -> Self {
            self.ctx = self.ctx.with_tracing(true);
            self
        }

        pub fn without_tracking(mut self) -> Self {
            self.ctx = self.ctx.with_tracing(false);
            self
        }

        pub fn execution_context(&self) -> &ExecutionContext {
            &self.ctx
        }
    };
}

#[derive(Clone)]
pub struct Dao {
    engine: Engine,
    table: TableIdentity,
    ctx: ExecutionContext,
    interceptors: InterceptorRegistry,
}

impl Dao {
    pub(crate) fn new(engine: Engine, table: TableIdentity) -> Self {
        let config = engine.config();
        let mut ctx = ExecutionContext::default();
        if let Some(consistency) = config.default_consistency {
            ctx = ctx.with_consistency(consistency);
        }
        if let Some(consistency) = config.default_serial_consistency {
            ctx = ctx.with_serial_consistency(consistency);
        }
        Self {
            engine,
            table,
            ctx,
            interceptors: InterceptorRegistry::default(),
        }
    }

    execution_options!();

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorRegistry) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn with_write_interceptor(
        mut self,
        interceptor: impl WriteRequestInterceptor + 'static,
    ) -> Self {
        self.interceptors = self.interceptors.with_write_request(Arc::new(interceptor));
        self
    }

    pub fn with_delete_interceptor(
        mut self,
        interceptor: impl DeleteRequestInterceptor + 'static,
    ) -> Self {
        self.interceptors = self.interceptors.with_delete_request(Arc::new(interceptor));
        self
    }

    pub fn with_read_interceptor(
        mut self,
        interceptor: impl ReadRequestInterceptor + 'static,
    ) -> Self {
        self.interceptors = self.interceptors.with_read_request(Arc::new(interceptor));
        self
    }

    pub fn with_read_response_interceptor(
        mut self,
        interceptor: impl ReadResponseInterceptor + 'static,
    ) -> Self {
        self.interceptors = self.interceptors.with_read_response(Arc::new(interceptor));
        self
    }

    pub fn with_cascade_on_write_interceptor(
        mut self,
        interceptor: impl CascadeOnWriteInterceptor + 'static,
    ) -> Self {
        self.interceptors = self.interceptors.with_cascade_on_write(Arc::new(interceptor));
        self
    }

    pub fn with_cascade_on_delete_interceptor(
        mut self,
        interceptor: impl CascadeOnDeleteInterceptor + 'static,
    ) -> Self {
        self.interceptors = self.interceptors.with_cascade_on_delete(Arc::new(interceptor));
        self
    }

    pub fn with_constraints(self, constraints: ConstraintsInterceptor) -> Self {
        self.with_write_interceptor(constraints)
    }

    /// Insert without keys; values name the full primary key.
    pub fn write(&self) -> Write {
        self.write_spec(WriteSpec::new(self.table.clone()))
    }

    pub fn write_with_key(&self, name: &str, value: impl IntoValue) -> Write {
        self.write_spec(WriteSpec::new(self.table.clone()).with_key(name, value))
    }

    pub fn write_with_keys<K, V>(&self, keys: impl IntoIterator<Item = (K, V)>) -> Write
    where
        K: AsRef<str>,
        V: IntoValue,
    {
        let spec = keys
            .into_iter()
            .fold(WriteSpec::new(self.table.clone()), |spec, (name, value)| {
                spec.with_key(name.as_ref(), value)
            });
        self.write_spec(spec)
    }

    pub fn write_where(&self, clause: Clause) -> Write {
        self.write_spec(WriteSpec::new(self.table.clone()).where_condition(clause))
    }

    fn write_spec(&self, spec: WriteSpec) -> Write {
        Write {
            dao: self.clone(),
            ctx: self.ctx.clone(),
            spec,
        }
    }

    pub fn delete_with_key(&self, name: &str, value: impl IntoValue) -> Deletion {
        self.delete_spec(DeleteSpec::new(self.table.clone()).with_key(name, value))
    }

    pub fn delete_with_keys<K, V>(&self, keys: impl IntoIterator<Item = (K, V)>) -> Deletion
    where
        K: AsRef<str>,
        V: IntoValue,
    {
        let spec = keys
            .into_iter()
            .fold(DeleteSpec::new(self.table.clone()), |spec, (name, value)| {
                spec.with_key(name.as_ref(), value)
            });
        self.delete_spec(spec)
    }

    pub fn delete_where(&self, clause: Clause) -> Deletion {
        self.delete_spec(DeleteSpec::new(self.table.clone()).where_condition(clause))
    }

    fn delete_spec(&self, spec: DeleteSpec) -> Deletion {
        Deletion {
            dao: self.clone(),
            ctx: self.ctx.clone(),
            spec,
        }
    }

    /// Reads the row with the given complete primary key.
    pub fn read_with_key(&self, name: &str, value: impl IntoValue) -> SingleRead {
        self.single_read(
            ReadSpec::new(self.table.clone(), ReadCardinality::Single).with_key(name, value),
        )
    }

    pub fn read_with_keys<K, V>(&self, keys: impl IntoIterator<Item = (K, V)>) -> SingleRead
    where
        K: AsRef<str>,
        V: IntoValue,
    {
        let spec = keys.into_iter().fold(
            ReadSpec::new(self.table.clone(), ReadCardinality::Single),
            |spec, (name, value)| spec.with_key(name.as_ref(), value),
        );
        self.single_read(spec)
    }

    fn single_read(&self, spec: ReadSpec) -> SingleRead {
        SingleRead {
            dao: self.clone(),
            ctx: self.ctx.clone(),
            spec,
        }
    }

    /// Reads every row whose `name` is one of `values`.
    pub fn read_with_key_values<T: IntoValue>(
        &self,
        name: &str,
        values: impl IntoIterator<Item = T>,
    ) -> ListRead {
        self.list_read(self.many().with_key_values(name, values))
    }

    /// Reads the rows matching a partial primary key, e.g. one partition.
    pub fn read_list_with_keys<K, V>(&self, keys: impl IntoIterator<Item = (K, V)>) -> ListRead
    where
        K: AsRef<str>,
        V: IntoValue,
    {
        let spec = keys
            .into_iter()
            .fold(self.many(), |spec, (name, value)| spec.with_key(name.as_ref(), value));
        self.list_read(spec)
    }

    pub fn read_where(&self, clause: Clause) -> ListRead {
        self.list_read(self.many().where_condition(clause))
    }

    pub fn read_all(&self) -> ListRead {
        self.list_read(self.many())
    }

    fn many(&self) -> ReadSpec {
        let spec = ReadSpec::new(self.table.clone(), ReadCardinality::Many);
        match self.engine.config().default_fetch_size {
            Some(fetch_size) => spec.fetch_size(fetch_size),
            None => spec,
        }
    }

    fn list_read(&self, spec: ReadSpec) -> ListRead {
        ListRead {
            dao: self.clone(),
            ctx: self.ctx.clone(),
            spec,
        }
    }

    async fn read(
        &self,
        spec: ReadSpec,
        ctx: &ExecutionContext,
    ) -> Result<(ReadSpec, Records), DaoError> {
        let spec = self.interceptors.apply_read_request(spec).await?;
        let statement = self.engine.compiler().compile_read(&spec, ctx).await?;
        let records = self.engine.executor().query(statement).await?;
        let records = self.interceptors.apply_read_response(&spec, records).await?;
        Ok((spec, records))
    }
}

/// Insert or update of one row, or of the rows matched by where-conditions.
#[derive(Clone)]
pub struct Write {
    dao: Dao,
    spec: WriteSpec,
    ctx: ExecutionContext,
}

impl Write {
    execution_options!();

    pub fn spec(&self) -> &WriteSpec {
        &self.spec
    }

    pub fn value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.spec = self.spec.value(name, value);
        self
    }

    /// Name/value pairs, e.g. produced by an entity mapper.
    pub fn values<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: IntoValue,
    {
        self.spec = self.spec.values(values);
        self
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.spec = self.spec.where_condition(clause);
        self
    }

    pub fn add_set_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.spec = self.spec.add_set_value(name, value);
        self
    }

    pub fn remove_set_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.spec = self.spec.remove_set_value(name, value);
        self
    }

    pub fn prepend_list_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.spec = self.spec.prepend_list_value(name, value);
        self
    }

    pub fn append_list_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.spec = self.spec.append_list_value(name, value);
        self
    }

    pub fn remove_list_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.spec = self.spec.remove_list_value(name, value);
        self
    }

    pub fn put_map_value(mut self, name: &str, key: impl IntoValue, value: impl IntoValue) -> Self {
        self.spec = self.spec.put_map_value(name, key, value);
        self
    }

    pub fn only_if(mut self, clause: Clause) -> Self {
        self.spec = self.spec.only_if(clause);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.spec = self.spec.if_not_exists();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.spec = self.spec.ttl(ttl);
        self
    }

    /// Switches to a counter update of `column`. Keys and where-conditions
    /// carry over; plain values do not.
    pub fn incr(self, column: &str) -> CounterMutation {
        self.incr_by(column, 1)
    }

    pub fn incr_by(self, column: &str, delta: i64) -> CounterMutation {
        CounterMutation {
            spec: CounterSpec::for_write(&self.spec, column, delta),
            dao: self.dao,
            ctx: self.ctx,
        }
    }

    pub fn decr(self, column: &str) -> CounterMutation {
        self.incr_by(column, -1)
    }

    pub fn decr_by(self, column: &str, delta: i64) -> CounterMutation {
        self.incr_by(column, delta.saturating_neg())
    }

    pub fn combined_with(self, other: impl Into<Batchable>) -> BatchMutation {
        let engine = self.dao.engine.clone();
        let ctx = self.ctx.clone();
        BatchMutation::new(engine, ctx, self.into()).combined_with(other)
    }

    pub async fn execute(self) -> Result<ResultMeta, DaoError> {
        let engine = self.dao.engine.clone();
        let ctx = self.ctx.clone();
        run_mutations(&engine, vec![self.into()], None, &ctx).await
    }

    pub fn execute_blocking(self) -> Result<ResultMeta, DaoError> {
        let rt = self.dao.engine.runtime()?;
        block_on_engine(&rt, self.execute())
    }
}

impl From<Write> for Batchable {
    fn from(write: Write) -> Self {
        Batchable::new(write.spec).with_interceptors(write.dao.interceptors)
    }
}

#[derive(Clone)]
pub struct CounterMutation {
    dao: Dao,
    spec: CounterSpec,
    ctx: ExecutionContext,
}

impl CounterMutation {
    execution_options!();

    pub fn spec(&self) -> &CounterSpec {
        &self.spec
    }

    pub fn combined_with(self, other: impl Into<Batchable>) -> BatchMutation {
        let engine = self.dao.engine.clone();
        let ctx = self.ctx.clone();
        BatchMutation::new(engine, ctx, self.into()).combined_with(other)
    }

    pub async fn execute(self) -> Result<ResultMeta, DaoError> {
        let engine = self.dao.engine.clone();
        let ctx = self.ctx.clone();
        run_mutations(&engine, vec![self.into()], None, &ctx).await
    }

    pub fn execute_blocking(self) -> Result<ResultMeta, DaoError> {
        let rt = self.dao.engine.runtime()?;
        block_on_engine(&rt, self.execute())
    }
}

impl From<CounterMutation> for Batchable {
    fn from(mutation: CounterMutation) -> Self {
        Batchable::new(mutation.spec).with_interceptors(mutation.dao.interceptors)
    }
}

#[derive(Clone)]
pub struct Deletion {
    dao: Dao,
    spec: DeleteSpec,
    ctx: ExecutionContext,
}

impl Deletion {
    execution_options!();

    pub fn spec(&self) -> &DeleteSpec {
        &self.spec
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.spec = self.spec.where_condition(clause);
        self
    }

    pub fn only_if(mut self, clause: Clause) -> Self {
        self.spec = self.spec.only_if(clause);
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.spec = self.spec.if_exists();
        self
    }

    pub fn combined_with(self, other: impl Into<Batchable>) -> BatchMutation {
        let engine = self.dao.engine.clone();
        let ctx = self.ctx.clone();
        BatchMutation::new(engine, ctx, self.into()).combined_with(other)
    }

    pub async fn execute(self) -> Result<ResultMeta, DaoError> {
        let engine = self.dao.engine.clone();
        let ctx = self.ctx.clone();
        run_mutations(&engine, vec![self.into()], None, &ctx).await
    }

    pub fn execute_blocking(self) -> Result<ResultMeta, DaoError> {
        let rt = self.dao.engine.runtime()?;
        block_on_engine(&rt, self.execute())
    }
}

impl From<Deletion> for Batchable {
    fn from(deletion: Deletion) -> Self {
        Batchable::new(deletion.spec).with_interceptors(deletion.dao.interceptors)
    }
}

/// Several mutations sent as one atomic batch. Execution options of the
/// batch apply to every member.
#[derive(Clone)]
pub struct BatchMutation {
    engine: Engine,
    members: Vector<Batchable>,
    kind: Option<BatchKind>,
    ctx: ExecutionContext,
}

impl BatchMutation {
    fn new(engine: Engine, ctx: ExecutionContext, first: Batchable) -> Self {
        Self {
            engine,
            members: Vector::unit(first),
            kind: None,
            ctx,
        }
    }

    execution_options!();

    pub fn combined_with(mut self, other: impl Into<Batchable>) -> Self {
        self.members.push_back(other.into());
        self
    }

    pub fn with_logged_batch_type(mut self) -> Self {
        self.kind = Some(BatchKind::Logged);
        self
    }

    pub fn with_unlogged_batch_type(mut self) -> Self {
        self.kind = Some(BatchKind::Unlogged);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub async fn execute(self) -> Result<ResultMeta, DaoError> {
        let members = self.members.into_iter().collect();
        run_mutations(&self.engine, members, self.kind, &self.ctx).await
    }

    pub fn execute_blocking(self) -> Result<ResultMeta, DaoError> {
        let rt = self.engine.runtime()?;
        block_on_engine(&rt, self.execute())
    }
}

/// Read of at most one row.
#[derive(Clone)]
pub struct SingleRead {
    dao: Dao,
    spec: ReadSpec,
    ctx: ExecutionContext,
}

impl SingleRead {
    execution_options!();

    pub fn spec(&self) -> &ReadSpec {
        &self.spec
    }

    pub fn column(mut self, name: &str) -> Self {
        self.spec = self.spec.column(name);
        self
    }

    pub fn columns<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        for name in names {
            self.spec = self.spec.column(name.as_ref());
        }
        self
    }

    /// Also fetches write time and ttl of `name`.
    pub fn column_with_metadata(mut self, name: &str) -> Self {
        self.spec = self.spec.column_with_metadata(name);
        self
    }

    pub fn all_columns(mut self) -> Self {
        self.spec = self.spec.all_columns();
        self
    }

    /// `Ok(None)` when no row exists; [`DaoError::TooManyResults`] when the
    /// key matched more than one row.
    pub async fn execute(self) -> Result<Option<Record>, DaoError> {
        let (spec, records) = self.dao.read(self.spec, &self.ctx).await?;
        records.into_single(&spec.table().to_string()).await
    }

    pub async fn execute_as<T: TryFromRecord>(self) -> Result<Option<T>, DaoError> {
        self.execute().await?.map(|record| record.decode()).transpose()
    }

    pub fn execute_blocking(self) -> Result<Option<Record>, DaoError> {
        let rt = self.dao.engine.runtime()?;
        block_on_engine(&rt, self.execute())
    }
}

/// Read of any number of rows, fetched page by page.
#[derive(Clone)]
pub struct ListRead {
    dao: Dao,
    spec: ReadSpec,
    ctx: ExecutionContext,
}

impl ListRead {
    execution_options!();

    pub fn spec(&self) -> &ReadSpec {
        &self.spec
    }

    pub fn column(mut self, name: &str) -> Self {
        self.spec = self.spec.column(name);
        self
    }

    pub fn columns<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        for name in names {
            self.spec = self.spec.column(name.as_ref());
        }
        self
    }

    pub fn column_with_metadata(mut self, name: &str) -> Self {
        self.spec = self.spec.column_with_metadata(name);
        self
    }

    pub fn all_columns(mut self) -> Self {
        self.spec = self.spec.all_columns();
        self
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.spec = self.spec.where_condition(clause);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.spec = self.spec.limit(limit);
        self
    }

    pub fn with_allow_filtering(mut self) -> Self {
        self.spec = self.spec.allow_filtering();
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.spec = self.spec.fetch_size(fetch_size);
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.spec = self.spec.distinct();
        self
    }

    pub async fn execute(self) -> Result<Records, DaoError> {
        let (_, records) = self.dao.read(self.spec, &self.ctx).await?;
        Ok(records)
    }

    /// Blocks until every page is fetched.
    pub fn execute_blocking(self) -> Result<Vec<Record>, DaoError> {
        let rt = self.dao.engine.runtime()?;
        block_on_engine(&rt, async move { self.execute().await?.collect_all().await })
    }
}

/// Runs request interceptors, compiles and gathers cascades for every
/// member, then sends everything in one round trip. Nothing is sent if any
/// step fails.
async fn run_mutations(
    engine: &Engine,
    members: Vec<Batchable>,
    kind: Option<BatchKind>,
    ctx: &ExecutionContext,
) -> Result<ResultMeta, DaoError> {
    let compiler = engine.compiler();
    let mut pending: VecDeque<(Batchable, usize)> =
        members.into_iter().map(|member| (member, 0)).collect();
    let mut statements = Vec::new();

    while let Some((member, depth)) = pending.pop_front() {
        let (spec, interceptors) = member.into_parts();
        let (statement, cascaded) = match spec {
            MutationSpec::Write(spec) => {
                let spec = interceptors.apply_write_request(spec).await?;
                futures::try_join!(
                    compiler.compile_write(&spec, ctx),
                    interceptors.cascade_on_write(&spec)
                )?
            }
            MutationSpec::Delete(spec) => {
                let spec = interceptors.apply_delete_request(spec).await?;
                futures::try_join!(
                    compiler.compile_delete(&spec, ctx),
                    interceptors.cascade_on_delete(&spec)
                )?
            }
            MutationSpec::Counter(spec) => {
                (compiler.compile_counter(&spec, ctx).await?, Vec::new())
            }
        };
        if !cascaded.is_empty() {
            if depth >= MAX_CASCADE_DEPTH {
                return Err(DaoError::Validation(format!(
                    "cascading mutations from {} nest deeper than {MAX_CASCADE_DEPTH} levels",
                    statement.table()
                )));
            }
            debug!(
                table = %statement.table(),
                cascaded = cascaded.len(),
                "cascade interceptors produced mutations"
            );
            pending.extend(cascaded.into_iter().map(|member| (member, depth + 1)));
        }
        statements.push(statement);
    }

    let executor = engine.executor();
    if kind.is_none()
        && statements.len() == 1
        && let Some(statement) = statements.pop()
    {
        return executor.submit(statement).await;
    }
    let batch = BatchAssembler::assemble(statements, kind, ctx)?;
    executor.submit(batch).await
}
