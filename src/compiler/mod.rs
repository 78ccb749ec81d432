//! Turns mutation and read specs into executable statements.
//!
//! Key-addressed statements bind every value positionally and are prepared
//! once per distinct text through the [`StatementCache`]. Statements filtered
//! by where-conditions or guarded by only-if conditions inline their values
//! as literals and are sent unprepared.

mod convert;
pub mod statement;

use crate::catalog::schema::{TableIdentity, quote_identifier};
use crate::catalog::types::CqlValue;
use crate::catalog::{ColumnCatalogEntry, MetadataCatalog, UdtDefs};
use crate::error::DaoError;
use crate::query::clause::Clause;
use crate::query::spec::{
    CounterSpec, DeleteSpec, ExecutionContext, MutationSpec, ReadSpec, WriteSpec,
};
use crate::statement_cache::StatementCache;
use convert::ValueBinder;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use statement::{CompiledStatement, Guard, StatementKind};

/// How values reach the statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Markers,
    Literals,
}

/// Accumulates statement fragments together with their bound values.
struct Fragments {
    binding: Binding,
    values: Vec<CqlValue>,
}

impl Fragments {
    fn new(binding: Binding) -> Self {
        Self {
            binding,
            values: Vec::new(),
        }
    }

    /// Returns the placeholder for `value`: a `?` marker recording the value,
    /// or its literal.
    fn slot(&mut self, value: CqlValue) -> String {
        match self.binding {
            Binding::Markers => {
                self.values.push(value);
                "?".to_string()
            }
            Binding::Literals => value.to_cql_literal(),
        }
    }

    /// TTL 0 means "never expire" to the store, so zero and fractional
    /// durations are rejected rather than truncated.
    fn ttl(&mut self, ttl: Duration) -> Result<String, DaoError> {
        if ttl.is_zero() || ttl.subsec_nanos() != 0 {
            return Err(DaoError::Validation(format!(
                "ttl {ttl:?} must be a positive whole number of seconds"
            )));
        }
        let secs = i32::try_from(ttl.as_secs())
            .map_err(|_| DaoError::Validation(format!("ttl {ttl:?} is out of range")))?;
        Ok(self.slot(CqlValue::Int(secs)))
    }

    fn relation(&mut self, binder: &ValueBinder<'_>, clause: &Clause) -> Result<String, DaoError> {
        let column = clause.column();
        let quoted = quote_identifier(column);
        match clause {
            Clause::In(_, values) => {
                if values.is_empty() {
                    return Err(DaoError::Validation(format!(
                        "IN condition on '{column}' needs at least one value"
                    )));
                }
                let mut slots = Vec::with_capacity(values.len());
                for value in values {
                    let bound = binder.bind(column, value)?;
                    slots.push(self.slot(bound));
                }
                Ok(format!("{quoted} IN ({})", slots.join(", ")))
            }
            _ => {
                let [value] = clause.values() else {
                    return Err(DaoError::Validation(format!(
                        "condition on '{column}' needs exactly one value"
                    )));
                };
                let bound = binder.bind(column, value)?;
                let slot = self.slot(bound);
                Ok(format!("{quoted} {} {slot}", clause.operator()))
            }
        }
    }
}

#[derive(Clone)]
pub struct StatementCompiler {
    catalog: MetadataCatalog,
    statements: StatementCache,
}

impl StatementCompiler {
    pub fn new(catalog: MetadataCatalog, statements: StatementCache) -> Self {
        Self {
            catalog,
            statements,
        }
    }

    pub fn catalog(&self) -> &MetadataCatalog {
        &self.catalog
    }

    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    pub async fn compile_mutation(
        &self,
        spec: &MutationSpec,
        ctx: &ExecutionContext,
    ) -> Result<CompiledStatement, DaoError> {
        match spec {
            MutationSpec::Write(spec) => self.compile_write(spec, ctx).await,
            MutationSpec::Delete(spec) => self.compile_delete(spec, ctx).await,
            MutationSpec::Counter(spec) => self.compile_counter(spec, ctx).await,
        }
    }

    pub async fn compile_write(
        &self,
        spec: &WriteSpec,
        ctx: &ExecutionContext,
    ) -> Result<CompiledStatement, DaoError> {
        if spec.is_if_not_exists() && !spec.where_conditions().is_empty() {
            return Err(DaoError::Validation(
                "if-not-exists can not be combined with where conditions".into(),
            ));
        }
        let (entry, udts) = self.schema_for(spec.table()).await?;
        let binder = ValueBinder::new(&entry, &udts);

        let insert_shaped = spec.where_conditions().is_empty()
            && (spec.is_if_not_exists()
                || spec.keys().is_empty()
                || (!spec.has_collection_deltas() && spec.only_if_conditions().is_empty()));
        if insert_shaped {
            return self.compile_insert(spec, ctx, &binder).await;
        }

        let binding = if spec.where_conditions().is_empty() && spec.only_if_conditions().is_empty()
        {
            Binding::Markers
        } else {
            Binding::Literals
        };
        self.compile_update(spec, ctx, &binder, binding).await
    }

    async fn compile_insert(
        &self,
        spec: &WriteSpec,
        ctx: &ExecutionContext,
        binder: &ValueBinder<'_>,
    ) -> Result<CompiledStatement, DaoError> {
        if !spec.only_if_conditions().is_empty() {
            return Err(DaoError::Validation(
                "only-if conditions need a keyed update, not an insert".into(),
            ));
        }
        if !spec.set_removes().is_empty() || !spec.list_removes().is_empty() {
            return Err(DaoError::Validation(
                "collection removals need a keyed update, not an insert".into(),
            ));
        }

        let mut columns: BTreeMap<&str, CqlValue> = BTreeMap::new();
        for (name, value) in spec.values_to_set() {
            columns.insert(name.as_str(), binder.bind(name, value)?);
        }
        for (name, value) in spec.keys() {
            columns.insert(name.as_str(), binder.bind(name, value)?);
        }

        // Collection deltas become whole collection values on insert.
        let mut folded: Vec<(&str, CqlValue)> = Vec::new();
        for (name, values) in spec.set_adds() {
            folded.push((name.as_str(), binder.bind_set(name, values)?));
        }
        let list_columns = spec
            .list_prepends()
            .keys()
            .chain(spec.list_appends().keys())
            .collect::<std::collections::BTreeSet<_>>();
        for name in list_columns {
            let prepends = spec.list_prepends().get(name).into_iter().flatten();
            let appends = spec.list_appends().get(name).into_iter().flatten();
            folded.push((name.as_str(), binder.bind_list(name, prepends.chain(appends))?));
        }
        for (name, entries) in spec.map_puts() {
            folded.push((name.as_str(), binder.bind_map(name, entries.iter())?));
        }
        for (name, value) in folded {
            if columns.insert(name, value).is_some() {
                return Err(DaoError::Validation(format!(
                    "column '{name}' is both assigned and modified"
                )));
            }
        }
        if columns.is_empty() {
            return Err(DaoError::Validation(format!(
                "nothing to write into {}",
                spec.table()
            )));
        }

        let mut fragments = Fragments::new(Binding::Markers);
        let mut names = Vec::with_capacity(columns.len());
        let mut slots = Vec::with_capacity(columns.len());
        for (name, value) in columns {
            names.push(quote_identifier(name).into_owned());
            slots.push(fragments.slot(value));
        }
        let mut text = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.table().cql(),
            names.join(", "),
            slots.join(", ")
        );
        if spec.is_if_not_exists() {
            text.push_str(" IF NOT EXISTS");
        }
        if let Some(ttl) = spec.ttl_duration() {
            let slot = fragments.ttl(ttl)?;
            text.push_str(&format!(" USING TTL {slot}"));
        }

        let guard = if spec.is_if_not_exists() {
            Guard::IfNotExists
        } else {
            Guard::None
        };
        self.finish(
            spec.table(),
            StatementKind::Insert,
            guard,
            text,
            fragments,
            ctx,
            spec.ttl_duration(),
        )
        .await
    }

    async fn compile_update(
        &self,
        spec: &WriteSpec,
        ctx: &ExecutionContext,
        binder: &ValueBinder<'_>,
        binding: Binding,
    ) -> Result<CompiledStatement, DaoError> {
        let mut fragments = Fragments::new(binding);
        let mut text = format!("UPDATE {}", spec.table().cql());
        if let Some(ttl) = spec.ttl_duration() {
            let slot = fragments.ttl(ttl)?;
            text.push_str(&format!(" USING TTL {slot}"));
        }

        let mut assignments = Vec::new();
        for (name, value) in spec.values_to_set() {
            if binder.column(name)?.is_primary_key() {
                continue;
            }
            let slot = fragments.slot(binder.bind(name, value)?);
            assignments.push(format!("{} = {slot}", quote_identifier(name)));
        }
        for (name, values) in spec.set_adds() {
            let slot = fragments.slot(binder.bind_set(name, values)?);
            let c = quote_identifier(name);
            assignments.push(format!("{c} = {c} + {slot}"));
        }
        for (name, values) in spec.set_removes() {
            let slot = fragments.slot(binder.bind_set(name, values)?);
            let c = quote_identifier(name);
            assignments.push(format!("{c} = {c} - {slot}"));
        }
        for (name, values) in spec.list_prepends() {
            let slot = fragments.slot(binder.bind_list(name, values)?);
            let c = quote_identifier(name);
            assignments.push(format!("{c} = {slot} + {c}"));
        }
        for (name, values) in spec.list_appends() {
            let slot = fragments.slot(binder.bind_list(name, values)?);
            let c = quote_identifier(name);
            assignments.push(format!("{c} = {c} + {slot}"));
        }
        for (name, values) in spec.list_removes() {
            let slot = fragments.slot(binder.bind_list(name, values)?);
            let c = quote_identifier(name);
            assignments.push(format!("{c} = {c} - {slot}"));
        }
        for (name, entries) in spec.map_puts() {
            let bound = binder.bind_map(name, entries.iter())?;
            if matches!(&bound, CqlValue::Map(entries) if entries.is_empty()) {
                continue;
            }
            let slot = fragments.slot(bound);
            let c = quote_identifier(name);
            assignments.push(format!("{c} = {c} + {slot}"));
        }
        if assignments.is_empty() {
            return Err(DaoError::Validation(format!(
                "nothing to update in {}",
                spec.table()
            )));
        }
        text.push_str(" SET ");
        text.push_str(&assignments.join(", "));

        let relations =
            where_relations(binder, &mut fragments, spec.keys(), spec.where_conditions())?;
        text.push_str(" WHERE ");
        text.push_str(&relations.join(" AND "));

        let guard =
            push_only_if(binder, &mut fragments, &mut text, spec.only_if_conditions())?;
        self.finish(
            spec.table(),
            StatementKind::Update,
            guard,
            text,
            fragments,
            ctx,
            spec.ttl_duration(),
        )
        .await
    }

    pub async fn compile_counter(
        &self,
        spec: &CounterSpec,
        ctx: &ExecutionContext,
    ) -> Result<CompiledStatement, DaoError> {
        if spec.keys().is_empty() && spec.where_conditions().is_empty() {
            return Err(DaoError::Validation(
                "counter update needs keys or where conditions".into(),
            ));
        }
        let (entry, udts) = self.schema_for(spec.table()).await?;
        let binder = ValueBinder::new(&entry, &udts);
        let column_type = &binder.column(spec.column())?.column_type;
        if !column_type.is_counter() {
            return Err(DaoError::TypeMismatch {
                table: spec.table().to_string(),
                column: spec.column().to_string(),
                expected: "counter".into(),
                actual: column_type.to_string(),
            });
        }

        let binding = if spec.where_conditions().is_empty() {
            Binding::Markers
        } else {
            Binding::Literals
        };
        let mut fragments = Fragments::new(binding);
        let c = quote_identifier(spec.column());
        let assignment = match binding {
            Binding::Markers => {
                let slot = fragments.slot(CqlValue::BigInt(spec.delta()));
                format!("{c} = {c} + {slot}")
            }
            Binding::Literals if spec.delta() < 0 => {
                format!("{c} = {c} - {}", spec.delta().unsigned_abs())
            }
            Binding::Literals => format!("{c} = {c} + {}", spec.delta()),
        };
        let relations =
            where_relations(&binder, &mut fragments, spec.keys(), spec.where_conditions())?;
        let text = format!(
            "UPDATE {} SET {assignment} WHERE {}",
            spec.table().cql(),
            relations.join(" AND ")
        );
        self.finish(
            spec.table(),
            StatementKind::Counter,
            Guard::None,
            text,
            fragments,
            ctx,
            None,
        )
        .await
    }

    pub async fn compile_delete(
        &self,
        spec: &DeleteSpec,
        ctx: &ExecutionContext,
    ) -> Result<CompiledStatement, DaoError> {
        if spec.keys().is_empty() && spec.where_conditions().is_empty() {
            return Err(DaoError::Validation(
                "delete needs keys or where conditions".into(),
            ));
        }
        if spec.is_if_exists() && !spec.only_if_conditions().is_empty() {
            return Err(DaoError::Validation(
                "if-exists can not be combined with only-if conditions".into(),
            ));
        }
        let (entry, udts) = self.schema_for(spec.table()).await?;
        let binder = ValueBinder::new(&entry, &udts);

        let binding = if spec.where_conditions().is_empty()
            && spec.only_if_conditions().is_empty()
            && !spec.is_if_exists()
        {
            Binding::Markers
        } else {
            Binding::Literals
        };
        let mut fragments = Fragments::new(binding);
        let relations =
            where_relations(&binder, &mut fragments, spec.keys(), spec.where_conditions())?;
        let mut text = format!(
            "DELETE FROM {} WHERE {}",
            spec.table().cql(),
            relations.join(" AND ")
        );
        let guard = if spec.is_if_exists() {
            text.push_str(" IF EXISTS");
            Guard::IfExists
        } else {
            push_only_if(&binder, &mut fragments, &mut text, spec.only_if_conditions())?
        };
        self.finish(
            spec.table(),
            StatementKind::Delete,
            guard,
            text,
            fragments,
            ctx,
            None,
        )
        .await
    }

    pub async fn compile_read(
        &self,
        spec: &ReadSpec,
        ctx: &ExecutionContext,
    ) -> Result<CompiledStatement, DaoError> {
        let (entry, udts) = self.schema_for(spec.table()).await?;
        let binder = ValueBinder::new(&entry, &udts);

        let projection = match spec.projected_columns() {
            None => "*".to_string(),
            Some(columns) => {
                let mut parts = Vec::with_capacity(columns.len());
                for (name, with_metadata) in columns {
                    binder.column(name)?;
                    let c = quote_identifier(name);
                    parts.push(c.to_string());
                    if *with_metadata {
                        parts.push(format!("WRITETIME({c})"));
                        parts.push(format!("TTL({c})"));
                    }
                }
                parts.join(", ")
            }
        };
        let mut text = format!(
            "SELECT {}{projection} FROM {}",
            if spec.is_distinct() { "DISTINCT " } else { "" },
            spec.table().cql()
        );

        let mut fragments = Fragments::new(Binding::Markers);
        let mut relations = Vec::new();
        for (name, values) in spec.keys() {
            match values.len() {
                0 => {
                    return Err(DaoError::Validation(format!(
                        "no values given for key '{name}'"
                    )));
                }
                1 => {
                    let slot = fragments.slot(binder.bind(name, &values[0])?);
                    relations.push(format!("{} = {slot}", quote_identifier(name)));
                }
                _ => {
                    let mut slots = Vec::with_capacity(values.len());
                    for value in values {
                        slots.push(fragments.slot(binder.bind(name, value)?));
                    }
                    relations.push(format!(
                        "{} IN ({})",
                        quote_identifier(name),
                        slots.join(", ")
                    ));
                }
            }
        }
        for clause in spec.where_conditions() {
            relations.push(fragments.relation(&binder, clause)?);
        }
        if !relations.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&relations.join(" AND "));
        }
        if let Some(limit) = spec.limit_value() {
            if limit == 0 {
                return Err(DaoError::Validation("limit must be > 0".into()));
            }
            let limit = i32::try_from(limit)
                .map_err(|_| DaoError::Validation(format!("limit {limit} is out of range")))?;
            let slot = fragments.slot(CqlValue::Int(limit));
            text.push_str(&format!(" LIMIT {slot}"));
        }
        if spec.is_allow_filtering() {
            text.push_str(" ALLOW FILTERING");
        }

        let prepare = spec.where_conditions().is_empty();
        let mut compiled = self
            .finish_with(
                spec.table(),
                StatementKind::Select,
                Guard::None,
                text,
                fragments,
                ctx,
                None,
                prepare,
            )
            .await?;
        compiled.options.fetch_size = spec.fetch_size_value();
        Ok(compiled)
    }

    async fn schema_for(
        &self,
        table: &TableIdentity,
    ) -> Result<(Arc<ColumnCatalogEntry>, UdtDefs), DaoError> {
        let entry = self.catalog.get_columns(table).await?;
        let udts = self
            .catalog
            .resolve_udts(&table.keyspace, entry.columns().iter().map(|c| &c.column_type))
            .await?;
        Ok((entry, udts))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        table: &TableIdentity,
        kind: StatementKind,
        guard: Guard,
        text: String,
        fragments: Fragments,
        ctx: &ExecutionContext,
        ttl: Option<Duration>,
    ) -> Result<CompiledStatement, DaoError> {
        let prepare = fragments.binding == Binding::Markers;
        self.finish_with(table, kind, guard, text, fragments, ctx, ttl, prepare)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_with(
        &self,
        table: &TableIdentity,
        kind: StatementKind,
        guard: Guard,
        text: String,
        fragments: Fragments,
        ctx: &ExecutionContext,
        ttl: Option<Duration>,
        prepare: bool,
    ) -> Result<CompiledStatement, DaoError> {
        let prepared = if prepare {
            Some(self.statements.prepare(&text).await?)
        } else {
            None
        };
        tracing::debug!(
            table = %table,
            statement = %text,
            prepared = prepared.is_some(),
            bound_values = fragments.values.len(),
            "statement compiled"
        );
        Ok(CompiledStatement {
            table: table.clone(),
            kind,
            guard,
            text: Arc::from(text),
            values: fragments.values,
            prepared,
            options: ctx.statement_options(),
            ttl,
        })
    }
}

/// Key equalities (ordered by column name) followed by where-conditions.
fn where_relations(
    binder: &ValueBinder<'_>,
    fragments: &mut Fragments,
    keys: &im::OrdMap<String, crate::catalog::types::Value>,
    conditions: &im::Vector<Clause>,
) -> Result<Vec<String>, DaoError> {
    let mut relations = Vec::with_capacity(keys.len() + conditions.len());
    for (name, value) in keys {
        let slot = fragments.slot(binder.bind(name, value)?);
        relations.push(format!("{} = {slot}", quote_identifier(name)));
    }
    for clause in conditions {
        relations.push(fragments.relation(binder, clause)?);
    }
    Ok(relations)
}

fn push_only_if(
    binder: &ValueBinder<'_>,
    fragments: &mut Fragments,
    text: &mut String,
    conditions: &im::Vector<Clause>,
) -> Result<Guard, DaoError> {
    if conditions.is_empty() {
        return Ok(Guard::None);
    }
    let mut parts = Vec::with_capacity(conditions.len());
    for clause in conditions {
        parts.push(fragments.relation(binder, clause)?);
    }
    text.push_str(" IF ");
    text.push_str(&parts.join(" AND "));
    Ok(Guard::OnlyIf)
}
