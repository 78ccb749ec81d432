//! Fetched rows and their typed accessors.

use crate::catalog::types::{CqlValue, UdtValue};
use crate::compiler::CompiledStatement;
use crate::error::{DaoError, RecordDecodeError};
use crate::executor::{AsyncExecutor, ResultMeta};
use crate::transport::ResultPage;
use bytes::Bytes;
use compact_str::CompactString;
use futures::Stream;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Conversion from a fetched column value.
pub trait FromCqlValue: Sized {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError>;
}

/// Decodes a whole record into a caller-side type, typically an entity.
pub trait TryFromRecord: Sized {
    fn try_from_record(record: &Record) -> Result<Self, DaoError>;
}

fn mismatch(column: &str, expected: &'static str, value: &CqlValue) -> RecordDecodeError {
    RecordDecodeError::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: value.type_name().to_string(),
    }
}

impl FromCqlValue for CqlValue {
    fn from_cql(_column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        Ok(value.clone())
    }
}

impl FromCqlValue for bool {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Boolean(b) => Ok(*b),
            other => Err(mismatch(column, "boolean", other)),
        }
    }
}

impl FromCqlValue for i32 {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Int(v) => Ok(*v),
            other => Err(mismatch(column, "int", other)),
        }
    }
}

impl FromCqlValue for i64 {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Int(v) => Ok(i64::from(*v)),
            CqlValue::BigInt(v) | CqlValue::Timestamp(v) => Ok(*v),
            other => Err(mismatch(column, "bigint", other)),
        }
    }
}

impl FromCqlValue for f32 {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Float(v) => Ok(*v),
            other => Err(mismatch(column, "float", other)),
        }
    }
}

impl FromCqlValue for f64 {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Float(v) => Ok(f64::from(*v)),
            CqlValue::Double(v) => Ok(*v),
            other => Err(mismatch(column, "double", other)),
        }
    }
}

impl FromCqlValue for String {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Text(s) => Ok(s.to_string()),
            other => Err(mismatch(column, "text", other)),
        }
    }
}

impl FromCqlValue for CompactString {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Text(s) => Ok(s.clone()),
            other => Err(mismatch(column, "text", other)),
        }
    }
}

impl FromCqlValue for Bytes {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Blob(bytes) => Ok(bytes.clone()),
            other => Err(mismatch(column, "blob", other)),
        }
    }
}

impl FromCqlValue for Vec<u8> {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        Bytes::from_cql(column, value).map(|bytes| bytes.to_vec())
    }
}

impl FromCqlValue for Uuid {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Uuid(id) => Ok(*id),
            other => Err(mismatch(column, "uuid", other)),
        }
    }
}

impl FromCqlValue for SystemTime {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Timestamp(ms) => {
                let offset = Duration::from_millis(ms.unsigned_abs());
                let time = if *ms >= 0 {
                    UNIX_EPOCH.checked_add(offset)
                } else {
                    UNIX_EPOCH.checked_sub(offset)
                };
                time.ok_or_else(|| {
                    RecordDecodeError::Custom(format!("timestamp {ms} out of range in '{column}'"))
                })
            }
            other => Err(mismatch(column, "timestamp", other)),
        }
    }
}

impl FromCqlValue for UdtValue {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        match value {
            CqlValue::Udt(udt) => Ok(udt.clone()),
            other => Err(mismatch(column, "udt", other)),
        }
    }
}

fn elements<'a>(
    column: &str,
    expected: &'static str,
    value: &'a CqlValue,
) -> Result<&'a [CqlValue], RecordDecodeError> {
    match value {
        CqlValue::List(items) | CqlValue::Set(items) => Ok(items),
        other => Err(mismatch(column, expected, other)),
    }
}

impl<T: FromCqlValue> FromCqlValue for Vec<T> {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        elements(column, "list", value)?
            .iter()
            .map(|item| T::from_cql(column, item))
            .collect()
    }
}

impl<T: FromCqlValue + Ord> FromCqlValue for BTreeSet<T> {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        elements(column, "set", value)?
            .iter()
            .map(|item| T::from_cql(column, item))
            .collect()
    }
}

impl<T: FromCqlValue + Eq + Hash> FromCqlValue for HashSet<T> {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        elements(column, "set", value)?
            .iter()
            .map(|item| T::from_cql(column, item))
            .collect()
    }
}

fn entries<'a>(
    column: &str,
    value: &'a CqlValue,
) -> Result<&'a [(CqlValue, CqlValue)], RecordDecodeError> {
    match value {
        CqlValue::Map(entries) => Ok(entries),
        other => Err(mismatch(column, "map", other)),
    }
}

impl<K: FromCqlValue + Ord, V: FromCqlValue> FromCqlValue for BTreeMap<K, V> {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        entries(column, value)?
            .iter()
            .map(|(k, v)| Ok((K::from_cql(column, k)?, V::from_cql(column, v)?)))
            .collect()
    }
}

impl<K: FromCqlValue + Eq + Hash, V: FromCqlValue> FromCqlValue for HashMap<K, V> {
    fn from_cql(column: &str, value: &CqlValue) -> Result<Self, RecordDecodeError> {
        entries(column, value)?
            .iter()
            .map(|(k, v)| Ok((K::from_cql(column, k)?, V::from_cql(column, v)?)))
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ColumnIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied().or_else(|| {
            self.names
                .iter()
                .position(|candidate| candidate.eq_ignore_ascii_case(name))
        })
    }
}

/// One fetched row. Accessors return `None` for columns that were not
/// projected as well as for null values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<ColumnIndex>,
    values: Vec<CqlValue>,
}

impl Record {
    /// Builds a record from `(column, value)` pairs, e.g. inside a response
    /// interceptor that synthesizes rows.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, CqlValue)>) -> Self {
        let (names, values): (Vec<String>, Vec<CqlValue>) = pairs.into_iter().unzip();
        Self {
            columns: Arc::new(ColumnIndex::new(names)),
            values,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, column: &str) -> Option<&CqlValue> {
        let position = self.columns.position(column)?;
        self.values.get(position).filter(|value| !value.is_null())
    }

    pub fn get<T: FromCqlValue>(&self, column: &str) -> Result<Option<T>, DaoError> {
        match self.value(column) {
            None => Ok(None),
            Some(value) => Ok(Some(T::from_cql(column, value)?)),
        }
    }

    /// Like [`Record::get`] but a missing or null column is an error.
    pub fn require<T: FromCqlValue>(&self, column: &str) -> Result<T, DaoError> {
        self.get(column)?.ok_or_else(|| {
            RecordDecodeError::MissingColumn {
                column: column.to_string(),
            }
            .into()
        })
    }

    /// Write time in microseconds, present when the column was read with
    /// metadata.
    pub fn writetime(&self, column: &str) -> Option<i64> {
        match self.value(&format!("writetime({column})"))? {
            CqlValue::BigInt(v) | CqlValue::Timestamp(v) => Some(*v),
            CqlValue::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Remaining time to live, present when the column was read with metadata
    /// and carries a ttl.
    pub fn ttl(&self, column: &str) -> Option<Duration> {
        match self.value(&format!("ttl({column})"))? {
            CqlValue::Int(secs) => u64::try_from(*secs).ok().map(Duration::from_secs),
            CqlValue::BigInt(secs) => u64::try_from(*secs).ok().map(Duration::from_secs),
            _ => None,
        }
    }

    pub fn decode<T: TryFromRecord>(&self) -> Result<T, DaoError> {
        T::try_from_record(self)
    }
}

struct PageSource {
    executor: AsyncExecutor,
    statement: Arc<CompiledStatement>,
}

/// Forward-only, lazily paginated read result.
///
/// Rows of the current page are buffered; consuming past them fetches the
/// next page. Not restartable.
pub struct Records {
    source: Option<PageSource>,
    buffered: VecDeque<Record>,
    paging_state: Option<Bytes>,
    result: ResultMeta,
}

impl Records {
    pub(crate) fn new(
        executor: AsyncExecutor,
        statement: Arc<CompiledStatement>,
        page: ResultPage,
    ) -> Self {
        let mut records = Self {
            source: Some(PageSource {
                executor,
                statement,
            }),
            buffered: VecDeque::new(),
            paging_state: None,
            result: ResultMeta::from_page(&page),
        };
        records.buffer_page(page);
        records
    }

    /// Fully materialized result, e.g. one rebuilt by a response interceptor.
    pub fn from_records(records: impl IntoIterator<Item = Record>, result: ResultMeta) -> Self {
        Self {
            source: None,
            buffered: records.into_iter().collect(),
            paging_state: None,
            result,
        }
    }

    fn buffer_page(&mut self, page: ResultPage) {
        let columns = Arc::new(ColumnIndex::new(page.columns));
        self.buffered.extend(page.rows.into_iter().map(|values| Record {
            columns: Arc::clone(&columns),
            values,
        }));
        self.paging_state = page.paging_state;
    }

    pub fn result(&self) -> &ResultMeta {
        &self.result
    }

    pub fn available_without_fetching(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_fully_fetched(&self) -> bool {
        self.source.is_none() || self.paging_state.is_none()
    }

    /// Fetches the next page into the buffer. No-op once fully fetched.
    pub async fn fetch_more(&mut self) -> Result<(), DaoError> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        let Some(paging_state) = self.paging_state.take() else {
            return Ok(());
        };
        let page = match source
            .executor
            .fetch_page(&source.statement, Some(paging_state.clone()))
            .await
        {
            Ok(page) => page,
            Err(err) => {
                self.paging_state = Some(paging_state);
                return Err(err);
            }
        };
        self.result.record_page(&page);
        self.buffer_page(page);
        Ok(())
    }

    pub async fn next(&mut self) -> Result<Option<Record>, DaoError> {
        // Pages may come back empty while more remain.
        while self.buffered.is_empty() && !self.is_fully_fetched() {
            self.fetch_more().await?;
        }
        Ok(self.buffered.pop_front())
    }

    pub async fn collect_all(mut self) -> Result<Vec<Record>, DaoError> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }

    /// Consumes the result expecting at most one row.
    /// The error carries the result as of the first page, before any
    /// fetch made to look for a second row.
    pub(crate) async fn into_single(mut self, table: &str) -> Result<Option<Record>, DaoError> {
        let first_page = self.result.clone();
        let first = self.next().await?;
        if first.is_some() && self.next_is_available().await? {
            return Err(DaoError::TooManyResults {
                message: format!("more than one record exists for {table}"),
                result: Box::new(first_page),
            });
        }
        Ok(first)
    }

    async fn next_is_available(&mut self) -> Result<bool, DaoError> {
        while self.buffered.is_empty() && !self.is_fully_fetched() {
            self.fetch_more().await?;
        }
        Ok(!self.buffered.is_empty())
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Record, DaoError>> {
        futures::stream::try_unfold(self, |mut records| async move {
            let next = records.next().await?;
            Ok::<_, DaoError>(next.map(|record| (record, records)))
        })
    }
}
