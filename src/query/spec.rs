//! Immutable mutation and read specifications.
//!
//! Every builder method returns a new value; the previous one stays valid and
//! shares structure with the new one, so a partially configured spec can be
//! reused as a template.

use crate::catalog::schema::TableIdentity;
use crate::catalog::types::{IntoValue, Value};
use crate::query::clause::Clause;
use crate::transport::{Consistency, StatementOptions};
use im::{OrdMap, OrdSet, Vector};
use std::time::Duration;

/// Options carried by the calling context rather than the statement itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub tracing: bool,
}

impl ExecutionContext {
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn statement_options(&self) -> StatementOptions {
        StatementOptions {
            consistency: self.consistency,
            serial_consistency: self.serial_consistency,
            tracing: self.tracing,
            ..StatementOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSpec {
    table: TableIdentity,
    keys: OrdMap<String, Value>,
    where_conditions: Vector<Clause>,
    values: OrdMap<String, Value>,
    set_adds: OrdMap<String, OrdSet<Value>>,
    set_removes: OrdMap<String, OrdSet<Value>>,
    list_prepends: OrdMap<String, Vector<Value>>,
    list_appends: OrdMap<String, Vector<Value>>,
    list_removes: OrdMap<String, Vector<Value>>,
    map_puts: OrdMap<String, OrdMap<Value, Value>>,
    only_if: Vector<Clause>,
    if_not_exists: bool,
    ttl: Option<Duration>,
}

impl WriteSpec {
    pub fn new(table: TableIdentity) -> Self {
        Self {
            table,
            keys: OrdMap::new(),
            where_conditions: Vector::new(),
            values: OrdMap::new(),
            set_adds: OrdMap::new(),
            set_removes: OrdMap::new(),
            list_prepends: OrdMap::new(),
            list_appends: OrdMap::new(),
            list_removes: OrdMap::new(),
            map_puts: OrdMap::new(),
            only_if: Vector::new(),
            if_not_exists: false,
            ttl: None,
        }
    }

    pub fn with_key(mut self, name: &str, value: impl IntoValue) -> Self {
        self.keys.insert(name.to_string(), value.into_value());
        self
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.where_conditions.push_back(clause);
        self
    }

    pub fn value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.values.insert(name.to_string(), value.into_value());
        self
    }

    pub fn values<K, V>(mut self, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: IntoValue,
    {
        for (name, value) in values {
            self.values
                .insert(name.as_ref().to_string(), value.into_value());
        }
        self
    }

    pub fn without_value(mut self, name: &str) -> Self {
        self.values.remove(name);
        self
    }

    pub fn add_set_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.set_adds
            .entry(name.to_string())
            .or_default()
            .insert(value.into_value());
        self
    }

    pub fn remove_set_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.set_removes
            .entry(name.to_string())
            .or_default()
            .insert(value.into_value());
        self
    }

    pub fn prepend_list_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.list_prepends
            .entry(name.to_string())
            .or_default()
            .push_back(value.into_value());
        self
    }

    pub fn append_list_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.list_appends
            .entry(name.to_string())
            .or_default()
            .push_back(value.into_value());
        self
    }

    pub fn remove_list_value(mut self, name: &str, value: impl IntoValue) -> Self {
        self.list_removes
            .entry(name.to_string())
            .or_default()
            .push_back(value.into_value());
        self
    }

    pub fn put_map_value(mut self, name: &str, key: impl IntoValue, value: impl IntoValue) -> Self {
        self.map_puts
            .entry(name.to_string())
            .or_default()
            .insert(key.into_value(), value.into_value());
        self
    }

    pub fn only_if(mut self, clause: Clause) -> Self {
        self.only_if.push_back(clause);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn keys(&self) -> &OrdMap<String, Value> {
        &self.keys
    }

    pub fn where_conditions(&self) -> &Vector<Clause> {
        &self.where_conditions
    }

    pub fn values_to_set(&self) -> &OrdMap<String, Value> {
        &self.values
    }

    pub fn set_adds(&self) -> &OrdMap<String, OrdSet<Value>> {
        &self.set_adds
    }

    pub fn set_removes(&self) -> &OrdMap<String, OrdSet<Value>> {
        &self.set_removes
    }

    pub fn list_prepends(&self) -> &OrdMap<String, Vector<Value>> {
        &self.list_prepends
    }

    pub fn list_appends(&self) -> &OrdMap<String, Vector<Value>> {
        &self.list_appends
    }

    pub fn list_removes(&self) -> &OrdMap<String, Vector<Value>> {
        &self.list_removes
    }

    pub fn map_puts(&self) -> &OrdMap<String, OrdMap<Value, Value>> {
        &self.map_puts
    }

    pub fn only_if_conditions(&self) -> &Vector<Clause> {
        &self.only_if
    }

    pub fn is_if_not_exists(&self) -> bool {
        self.if_not_exists
    }

    pub fn ttl_duration(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn has_collection_deltas(&self) -> bool {
        !(self.set_adds.is_empty()
            && self.set_removes.is_empty()
            && self.list_prepends.is_empty()
            && self.list_appends.is_empty()
            && self.list_removes.is_empty()
            && self.map_puts.is_empty())
    }

    /// Names every column this write touches outside of its keys.
    pub fn mutated_columns(&self) -> impl Iterator<Item = &str> {
        self.values
            .keys()
            .chain(self.set_adds.keys())
            .chain(self.set_removes.keys())
            .chain(self.list_prepends.keys())
            .chain(self.list_appends.keys())
            .chain(self.list_removes.keys())
            .chain(self.map_puts.keys())
            .map(String::as_str)
    }

    /// Whether the write was addressed at existing rows rather than
    /// creating one.
    pub fn is_update_intent(&self) -> bool {
        !self.if_not_exists && (!self.keys.is_empty() || !self.where_conditions.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSpec {
    table: TableIdentity,
    keys: OrdMap<String, Value>,
    where_conditions: Vector<Clause>,
    column: String,
    delta: i64,
}

impl CounterSpec {
    pub fn new(table: TableIdentity, column: &str, delta: i64) -> Self {
        Self {
            table,
            keys: OrdMap::new(),
            where_conditions: Vector::new(),
            column: column.to_string(),
            delta,
        }
    }

    /// Counter update addressed by the same keys and conditions as `write`.
    pub fn for_write(write: &WriteSpec, column: &str, delta: i64) -> Self {
        Self {
            table: write.table.clone(),
            keys: write.keys.clone(),
            where_conditions: write.where_conditions.clone(),
            column: column.to_string(),
            delta,
        }
    }

    pub fn with_key(mut self, name: &str, value: impl IntoValue) -> Self {
        self.keys.insert(name.to_string(), value.into_value());
        self
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.where_conditions.push_back(clause);
        self
    }

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn keys(&self) -> &OrdMap<String, Value> {
        &self.keys
    }

    pub fn where_conditions(&self) -> &Vector<Clause> {
        &self.where_conditions
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteSpec {
    table: TableIdentity,
    keys: OrdMap<String, Value>,
    where_conditions: Vector<Clause>,
    only_if: Vector<Clause>,
    if_exists: bool,
}

impl DeleteSpec {
    pub fn new(table: TableIdentity) -> Self {
        Self {
            table,
            keys: OrdMap::new(),
            where_conditions: Vector::new(),
            only_if: Vector::new(),
            if_exists: false,
        }
    }

    pub fn with_key(mut self, name: &str, value: impl IntoValue) -> Self {
        self.keys.insert(name.to_string(), value.into_value());
        self
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.where_conditions.push_back(clause);
        self
    }

    pub fn only_if(mut self, clause: Clause) -> Self {
        self.only_if.push_back(clause);
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn keys(&self) -> &OrdMap<String, Value> {
        &self.keys
    }

    pub fn where_conditions(&self) -> &Vector<Clause> {
        &self.where_conditions
    }

    pub fn only_if_conditions(&self) -> &Vector<Clause> {
        &self.only_if
    }

    pub fn is_if_exists(&self) -> bool {
        self.if_exists
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCardinality {
    /// At most one record; more is an error.
    Single,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSpec {
    table: TableIdentity,
    cardinality: ReadCardinality,
    keys: OrdMap<String, Vector<Value>>,
    where_conditions: Vector<Clause>,
    /// Projected columns; `true` also fetches write time and ttl.
    columns: Option<OrdMap<String, bool>>,
    limit: Option<u32>,
    allow_filtering: bool,
    fetch_size: Option<u32>,
    distinct: bool,
}

impl ReadSpec {
    pub fn new(table: TableIdentity, cardinality: ReadCardinality) -> Self {
        Self {
            table,
            cardinality,
            keys: OrdMap::new(),
            where_conditions: Vector::new(),
            columns: None,
            limit: None,
            allow_filtering: false,
            fetch_size: None,
            distinct: false,
        }
    }

    pub fn with_key(mut self, name: &str, value: impl IntoValue) -> Self {
        self.keys
            .insert(name.to_string(), Vector::unit(value.into_value()));
        self
    }

    pub fn with_key_values<T: IntoValue>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        self.keys.insert(
            name.to_string(),
            values.into_iter().map(IntoValue::into_value).collect(),
        );
        self
    }

    pub fn where_condition(mut self, clause: Clause) -> Self {
        self.where_conditions.push_back(clause);
        self
    }

    pub fn column(self, name: &str) -> Self {
        self.project(name, false)
    }

    pub fn column_with_metadata(self, name: &str) -> Self {
        self.project(name, true)
    }

    fn project(mut self, name: &str, with_metadata: bool) -> Self {
        self.columns
            .get_or_insert_with(OrdMap::new)
            .insert(name.to_string(), with_metadata);
        self
    }

    pub fn all_columns(mut self) -> Self {
        self.columns = None;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn allow_filtering(mut self) -> Self {
        self.allow_filtering = true;
        self
    }

    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn cardinality(&self) -> ReadCardinality {
        self.cardinality
    }

    pub fn keys(&self) -> &OrdMap<String, Vector<Value>> {
        &self.keys
    }

    pub fn where_conditions(&self) -> &Vector<Clause> {
        &self.where_conditions
    }

    pub fn projected_columns(&self) -> Option<&OrdMap<String, bool>> {
        self.columns.as_ref()
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    pub fn is_allow_filtering(&self) -> bool {
        self.allow_filtering
    }

    pub fn fetch_size_value(&self) -> Option<u32> {
        self.fetch_size
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }
}

/// A mutation spec eligible for batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationSpec {
    Write(WriteSpec),
    Delete(DeleteSpec),
    Counter(CounterSpec),
}

impl MutationSpec {
    pub fn table(&self) -> &TableIdentity {
        match self {
            MutationSpec::Write(spec) => spec.table(),
            MutationSpec::Delete(spec) => spec.table(),
            MutationSpec::Counter(spec) => spec.table(),
        }
    }
}

impl From<WriteSpec> for MutationSpec {
    fn from(spec: WriteSpec) -> Self {
        MutationSpec::Write(spec)
    }
}

impl From<DeleteSpec> for MutationSpec {
    fn from(spec: DeleteSpec) -> Self {
        MutationSpec::Delete(spec)
    }
}

impl From<CounterSpec> for MutationSpec {
    fn from(spec: CounterSpec) -> Self {
        MutationSpec::Counter(spec)
    }
}
