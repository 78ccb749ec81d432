use crate::catalog::types::ColumnType;
use crate::error::DaoError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Quotes a CQL identifier unless it is a plain lowercase name.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// A table addressed by keyspace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableIdentity {
    pub keyspace: String,
    pub table: String,
}

impl TableIdentity {
    pub fn new(keyspace: &str, table: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            table: table.to_string(),
        }
    }

    /// Accepts `keyspace.table`, or a bare table name resolved against
    /// `default_keyspace`.
    pub fn parse(name: &str, default_keyspace: Option<&str>) -> Result<Self, DaoError> {
        let invalid = || DaoError::Validation(format!("invalid table name '{name}'"));
        match name.split_once('.') {
            Some((keyspace, table)) => {
                if keyspace.is_empty() || table.is_empty() || table.contains('.') {
                    return Err(invalid());
                }
                Ok(Self::new(keyspace, table))
            }
            None => {
                if name.is_empty() {
                    return Err(invalid());
                }
                let keyspace = default_keyspace.ok_or_else(|| {
                    DaoError::Validation(format!(
                        "table name '{name}' has no keyspace and no default keyspace is configured"
                    ))
                })?;
                Ok(Self::new(keyspace, name))
            }
        }
    }

    /// `keyspace.table` with identifiers quoted as needed.
    pub fn cql(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.keyspace),
            quote_identifier(&self.table)
        )
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Regular,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
    pub kind: ColumnKind,
}

impl ColumnMeta {
    pub fn new(name: &str, column_type: ColumnType, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            kind,
        }
    }

    pub fn is_primary_key(&self) -> bool {
        matches!(self.kind, ColumnKind::PartitionKey | ColumnKind::Clustering)
    }
}

/// Table description as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub identity: TableIdentity,
    pub columns: Vec<ColumnMeta>,
}

impl TableSchema {
    pub fn new(identity: TableIdentity) -> Self {
        Self {
            identity,
            columns: Vec::new(),
        }
    }

    pub fn partition_key(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns
            .push(ColumnMeta::new(name, column_type, ColumnKind::PartitionKey));
        self
    }

    pub fn clustering(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns
            .push(ColumnMeta::new(name, column_type, ColumnKind::Clustering));
        self
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns
            .push(ColumnMeta::new(name, column_type, ColumnKind::Regular));
        self
    }

    pub fn static_column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns
            .push(ColumnMeta::new(name, column_type, ColumnKind::Static));
        self
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| c.is_primary_key())
    }
}

/// Definition of a user-defined type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdtDef {
    pub keyspace: String,
    pub name: String,
    pub fields: Vec<(String, ColumnType)>,
}

impl UdtDef {
    pub fn new(keyspace: &str, name: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, column_type: ColumnType) -> Self {
        self.fields.push((name.to_string(), column_type));
        self
    }

    pub fn field_type(&self, name: &str) -> Option<&ColumnType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}
