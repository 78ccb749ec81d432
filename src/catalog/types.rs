use crate::catalog::schema::quote_identifier;
use bytes::Bytes;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Declared CQL type of a column or UDT field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Ascii,
    Text,
    Int,
    BigInt,
    Counter,
    Boolean,
    Float,
    Double,
    Blob,
    Timestamp,
    Uuid,
    TimeUuid,
    List(Box<ColumnType>),
    Set(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    /// User-defined type, resolved in the keyspace of the owning table.
    Udt(String),
}

impl ColumnType {
    pub fn is_counter(&self) -> bool {
        matches!(self, ColumnType::Counter)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Ascii)
    }

    /// Collects the names of every UDT reachable from this type.
    pub fn collect_udt_names(&self, out: &mut Vec<String>) {
        match self {
            ColumnType::List(inner) | ColumnType::Set(inner) => inner.collect_udt_names(out),
            ColumnType::Map(k, v) => {
                k.collect_udt_names(out);
                v.collect_udt_names(out);
            }
            ColumnType::Udt(name) => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Ascii => write!(f, "ascii"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Int => write!(f, "int"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Counter => write!(f, "counter"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Blob => write!(f, "blob"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::TimeUuid => write!(f, "timeuuid"),
            ColumnType::List(inner) => write!(f, "list<{inner}>"),
            ColumnType::Set(inner) => write!(f, "set<{inner}>"),
            ColumnType::Map(k, v) => write!(f, "map<{k}, {v}>"),
            ColumnType::Udt(name) => write!(f, "frozen<{}>", quote_identifier(name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseColumnTypeError(pub String);

impl fmt::Display for ParseColumnTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid column type '{}'", self.0)
    }
}

impl std::error::Error for ParseColumnTypeError {}

impl FromStr for ColumnType {
    type Err = ParseColumnTypeError;

    /// Parses CQL type strings as reported by schema metadata, e.g.
    /// `map<text, frozen<address>>`. `frozen<..>` is transparent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColumnTypeError(s.to_string());
        let trimmed = s.trim();
        if let Some((outer, inner)) = split_generic(trimmed) {
            return match outer.to_ascii_lowercase().as_str() {
                "frozen" => inner.parse(),
                "list" => Ok(ColumnType::List(Box::new(inner.parse()?))),
                "set" => Ok(ColumnType::Set(Box::new(inner.parse()?))),
                "map" => {
                    let (k, v) = split_top_level_comma(inner).ok_or_else(err)?;
                    Ok(ColumnType::Map(Box::new(k.parse()?), Box::new(v.parse()?)))
                }
                _ => Err(err()),
            };
        }
        if let Some(quoted) = trimmed
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        {
            return Ok(ColumnType::Udt(quoted.replace("\"\"", "\"")));
        }
        let lower = trimmed.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "ascii" => ColumnType::Ascii,
            "text" | "varchar" => ColumnType::Text,
            "int" => ColumnType::Int,
            "bigint" => ColumnType::BigInt,
            "counter" => ColumnType::Counter,
            "boolean" => ColumnType::Boolean,
            "float" => ColumnType::Float,
            "double" => ColumnType::Double,
            "blob" => ColumnType::Blob,
            "timestamp" => ColumnType::Timestamp,
            "uuid" => ColumnType::Uuid,
            "timeuuid" => ColumnType::TimeUuid,
            other
                if !other.is_empty()
                    && other
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                ColumnType::Udt(other.to_string())
            }
            _ => return Err(err()),
        })
    }
}

fn split_generic(s: &str) -> Option<(&str, &str)> {
    let open = s.find('<')?;
    let inner = s[open + 1..].strip_suffix('>')?;
    Some((s[..open].trim(), inner.trim()))
}

fn split_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((s[..idx].trim(), s[idx + 1..].trim())),
            _ => {}
        }
    }
    None
}

/// A caller-side value, before it is checked against a column's declared type.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(CompactString),
    /// Symbolic enumeration value, written as its name.
    Enum(CompactString),
    Bytes(Bytes),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// A structured object, written into a user-defined type column.
    Fields(BTreeMap<String, Value>),
}

impl Value {
    pub fn enumeration(name: &str) -> Self {
        Value::Enum(name.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Enum(_) => "enum",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Fields(_) => "object",
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int(_) => 2,
            Value::BigInt(_) => 3,
            Value::Float(_) => 4,
            Value::Double(_) => 5,
            Value::Timestamp(_) => 6,
            Value::Text(_) => 7,
            Value::Enum(_) => 8,
            Value::Bytes(_) => 9,
            Value::Uuid(_) => 10,
            Value::List(_) => 11,
            Value::Set(_) => 12,
            Value::Map(_) => 13,
            Value::Fields(_) => 14,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Fields(a), Value::Fields(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Value of a user-defined type as sent to or received from the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UdtValue {
    pub keyspace: String,
    pub type_name: String,
    pub fields: Vec<(String, CqlValue)>,
}

impl UdtValue {
    pub fn field(&self, name: &str) -> Option<&CqlValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// A value already shaped for a column's declared type.
#[derive(Debug, Clone)]
pub enum CqlValue {
    Null,
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(CompactString),
    Blob(Bytes),
    Timestamp(i64),
    Uuid(Uuid),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Udt(UdtValue),
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CqlValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CqlValue::Null => "null",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Int(_) => "int",
            CqlValue::BigInt(_) => "bigint",
            CqlValue::Float(_) => "float",
            CqlValue::Double(_) => "double",
            CqlValue::Text(_) => "text",
            CqlValue::Blob(_) => "blob",
            CqlValue::Timestamp(_) => "timestamp",
            CqlValue::Uuid(_) => "uuid",
            CqlValue::List(_) => "list",
            CqlValue::Set(_) => "set",
            CqlValue::Map(_) => "map",
            CqlValue::Udt(_) => "udt",
        }
    }

    /// Renders the value as an inline CQL literal.
    pub fn to_cql_literal(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }

    fn write_literal(&self, out: &mut String) {
        use std::fmt::Write as _;
        match self {
            CqlValue::Null => out.push_str("null"),
            CqlValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            CqlValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            CqlValue::BigInt(v) | CqlValue::Timestamp(v) => {
                let _ = write!(out, "{v}");
            }
            CqlValue::Float(v) => write_float(out, f64::from(*v)),
            CqlValue::Double(v) => write_float(out, *v),
            CqlValue::Text(s) => {
                out.push('\'');
                out.push_str(&s.replace('\'', "''"));
                out.push('\'');
            }
            CqlValue::Blob(bytes) => {
                out.push_str("0x");
                out.push_str(&hex::encode(bytes));
            }
            CqlValue::Uuid(id) => {
                let _ = write!(out, "{}", id.hyphenated());
            }
            CqlValue::List(items) => write_seq(out, '[', ']', items),
            CqlValue::Set(items) => write_seq(out, '{', '}', items),
            CqlValue::Map(entries) => {
                out.push('{');
                for (idx, (k, v)) in entries.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    k.write_literal(out);
                    out.push_str(": ");
                    v.write_literal(out);
                }
                out.push('}');
            }
            CqlValue::Udt(udt) => {
                out.push('{');
                for (idx, (name, v)) in udt.fields.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&quote_identifier(name));
                    out.push_str(": ");
                    v.write_literal(out);
                }
                out.push('}');
            }
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            CqlValue::Null => 0,
            CqlValue::Boolean(_) => 1,
            CqlValue::Int(_) => 2,
            CqlValue::BigInt(_) => 3,
            CqlValue::Float(_) => 4,
            CqlValue::Double(_) => 5,
            CqlValue::Timestamp(_) => 6,
            CqlValue::Text(_) => 7,
            CqlValue::Blob(_) => 8,
            CqlValue::Uuid(_) => 9,
            CqlValue::List(_) => 10,
            CqlValue::Set(_) => 11,
            CqlValue::Map(_) => 12,
            CqlValue::Udt(_) => 13,
        }
    }
}

fn write_float(out: &mut String, v: f64) {
    use std::fmt::Write as _;
    if v.is_nan() {
        out.push_str("NaN");
    } else if v.is_infinite() {
        out.push_str(if v > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        let _ = write!(out, "{v:?}");
    }
}

fn write_seq(out: &mut String, open: char, close: char, items: &[CqlValue]) {
    out.push(open);
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        item.write_literal(out);
    }
    out.push(close);
}

impl PartialEq for CqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CqlValue {}

impl PartialOrd for CqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (CqlValue::Boolean(a), CqlValue::Boolean(b)) => a.cmp(b),
            (CqlValue::Int(a), CqlValue::Int(b)) => a.cmp(b),
            (CqlValue::BigInt(a), CqlValue::BigInt(b)) => a.cmp(b),
            (CqlValue::Float(a), CqlValue::Float(b)) => a.total_cmp(b),
            (CqlValue::Double(a), CqlValue::Double(b)) => a.total_cmp(b),
            (CqlValue::Timestamp(a), CqlValue::Timestamp(b)) => a.cmp(b),
            (CqlValue::Text(a), CqlValue::Text(b)) => a.cmp(b),
            (CqlValue::Blob(a), CqlValue::Blob(b)) => a.cmp(b),
            (CqlValue::Uuid(a), CqlValue::Uuid(b)) => a.cmp(b),
            (CqlValue::List(a), CqlValue::List(b)) => a.cmp(b),
            (CqlValue::Set(a), CqlValue::Set(b)) => a.cmp(b),
            (CqlValue::Map(a), CqlValue::Map(b)) => a.cmp(b),
            (CqlValue::Udt(a), CqlValue::Udt(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Boolean(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::BigInt(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Double(self)
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self.into())
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.into())
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Text(self.as_str().into())
    }
}

impl IntoValue for CompactString {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for Bytes {
    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl IntoValue for &[u8] {
    fn into_value(self) -> Value {
        Value::Bytes(Bytes::copy_from_slice(self))
    }
}

impl IntoValue for Uuid {
    fn into_value(self) -> Value {
        Value::Uuid(self)
    }
}

impl IntoValue for SystemTime {
    fn into_value(self) -> Value {
        let millis = match self.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
        };
        Value::Timestamp(millis)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: IntoValue> IntoValue for BTreeSet<T> {
    fn into_value(self) -> Value {
        Value::Set(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: IntoValue + Eq + Hash> IntoValue for HashSet<T> {
    fn into_value(self) -> Value {
        let mut items: Vec<Value> = self.into_iter().map(IntoValue::into_value).collect();
        items.sort();
        Value::Set(items)
    }
}

impl<K: IntoValue, V: IntoValue> IntoValue for BTreeMap<K, V> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }
}

impl<K: IntoValue + Eq + Hash, V: IntoValue> IntoValue for HashMap<K, V> {
    fn into_value(self) -> Value {
        let mut entries: Vec<(Value, Value)> = self
            .into_iter()
            .map(|(k, v)| (k.into_value(), v.into_value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Map(entries)
    }
}

pub fn lit<T: IntoValue>(value: T) -> Value {
    value.into_value()
}
