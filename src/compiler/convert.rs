use crate::catalog::schema::ColumnMeta;
use crate::catalog::types::{ColumnType, CqlValue, UdtValue, Value};
use crate::catalog::{ColumnCatalogEntry, UdtDefs};
use crate::error::DaoError;

/// Checks caller values against declared column types and shapes them for
/// the wire. Never coerces across incompatible types.
pub(crate) struct ValueBinder<'a> {
    entry: &'a ColumnCatalogEntry,
    udts: &'a UdtDefs,
}

impl<'a> ValueBinder<'a> {
    pub fn new(entry: &'a ColumnCatalogEntry, udts: &'a UdtDefs) -> Self {
        Self { entry, udts }
    }

    pub fn column(&self, name: &str) -> Result<&'a ColumnMeta, DaoError> {
        self.entry.column(name)
    }

    pub fn bind(&self, column: &str, value: &Value) -> Result<CqlValue, DaoError> {
        let meta = self.column(column)?;
        self.convert(column, &meta.column_type, value)
    }

    /// Binds values as a set for a `set<..>` column.
    pub fn bind_set<'v>(
        &self,
        column: &str,
        values: impl IntoIterator<Item = &'v Value>,
    ) -> Result<CqlValue, DaoError> {
        let meta = self.column(column)?;
        let ColumnType::Set(element) = &meta.column_type else {
            return Err(self.mismatch(column, &meta.column_type, "set"));
        };
        let mut items = values
            .into_iter()
            .map(|v| self.convert(column, element, v))
            .collect::<Result<Vec<_>, _>>()?;
        items.sort();
        items.dedup();
        Ok(CqlValue::Set(items))
    }

    /// Binds values, in order, as a list for a `list<..>` column.
    pub fn bind_list<'v>(
        &self,
        column: &str,
        values: impl IntoIterator<Item = &'v Value>,
    ) -> Result<CqlValue, DaoError> {
        let meta = self.column(column)?;
        let ColumnType::List(element) = &meta.column_type else {
            return Err(self.mismatch(column, &meta.column_type, "list"));
        };
        let items = values
            .into_iter()
            .map(|v| self.convert(column, element, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CqlValue::List(items))
    }

    /// Binds entries for a `map<..>` column, dropping entries whose value is
    /// null.
    pub fn bind_map<'v>(
        &self,
        column: &str,
        entries: impl IntoIterator<Item = (&'v Value, &'v Value)>,
    ) -> Result<CqlValue, DaoError> {
        let meta = self.column(column)?;
        let ColumnType::Map(key_type, value_type) = &meta.column_type else {
            return Err(self.mismatch(column, &meta.column_type, "map"));
        };
        let mut out = Vec::new();
        for (k, v) in entries {
            if v.is_null() {
                continue;
            }
            out.push((
                self.convert(column, key_type, k)?,
                self.convert(column, value_type, v)?,
            ));
        }
        Ok(CqlValue::Map(out))
    }

    fn convert(&self, column: &str, ty: &ColumnType, value: &Value) -> Result<CqlValue, DaoError> {
        let converted = match (ty, value) {
            (_, Value::Null) => CqlValue::Null,
            (ColumnType::List(_) | ColumnType::Set(_), Value::List(items) | Value::Set(items))
                if items.is_empty() =>
            {
                CqlValue::Null
            }
            (ColumnType::Map(..), Value::Map(entries)) if entries.is_empty() => CqlValue::Null,
            (ColumnType::Boolean, Value::Boolean(b)) => CqlValue::Boolean(*b),
            (ColumnType::Int, Value::Int(v)) => CqlValue::Int(*v),
            (ColumnType::BigInt | ColumnType::Counter, Value::Int(v)) => {
                CqlValue::BigInt(i64::from(*v))
            }
            (ColumnType::BigInt | ColumnType::Counter, Value::BigInt(v)) => CqlValue::BigInt(*v),
            (ColumnType::Float, Value::Float(v)) => CqlValue::Float(*v),
            (ColumnType::Double, Value::Float(v)) => CqlValue::Double(f64::from(*v)),
            (ColumnType::Double, Value::Double(v)) => CqlValue::Double(*v),
            (ColumnType::Text, Value::Text(s) | Value::Enum(s)) => CqlValue::Text(s.clone()),
            (ColumnType::Ascii, Value::Text(s) | Value::Enum(s)) if s.is_ascii() => {
                CqlValue::Text(s.clone())
            }
            (ColumnType::Blob, Value::Bytes(bytes)) => CqlValue::Blob(bytes.clone()),
            (ColumnType::Timestamp, Value::Timestamp(ms)) => CqlValue::Timestamp(*ms),
            (ColumnType::Uuid | ColumnType::TimeUuid, Value::Uuid(id)) => CqlValue::Uuid(*id),
            (ColumnType::List(element), Value::List(items)) => CqlValue::List(
                items
                    .iter()
                    .map(|v| self.convert(column, element, v))
                    .collect::<Result<_, _>>()?,
            ),
            (ColumnType::Set(element), Value::Set(items) | Value::List(items)) => {
                let mut converted = items
                    .iter()
                    .map(|v| self.convert(column, element, v))
                    .collect::<Result<Vec<_>, _>>()?;
                converted.sort();
                converted.dedup();
                CqlValue::Set(converted)
            }
            (ColumnType::Map(key_type, value_type), Value::Map(entries)) => CqlValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| {
                        Ok((
                            self.convert(column, key_type, k)?,
                            self.convert(column, value_type, v)?,
                        ))
                    })
                    .collect::<Result<_, DaoError>>()?,
            ),
            (ColumnType::Udt(name), Value::Fields(fields)) => {
                self.convert_udt(column, name, fields)?
            }
            _ => return Err(self.mismatch(column, ty, value.type_name())),
        };
        Ok(converted)
    }

    fn convert_udt(
        &self,
        column: &str,
        name: &str,
        fields: &std::collections::BTreeMap<String, Value>,
    ) -> Result<CqlValue, DaoError> {
        let keyspace = &self.entry.table().keyspace;
        let def = self.udts.get(name).ok_or_else(|| DaoError::TypeNotFound {
            keyspace: keyspace.clone(),
            name: name.to_string(),
        })?;
        if let Some(unknown) = fields.keys().find(|f| def.field_type(f).is_none()) {
            return Err(DaoError::UnknownColumn {
                table: format!("{keyspace}.{name}"),
                column: unknown.clone(),
            });
        }
        let mut out = Vec::with_capacity(def.fields.len());
        for (field, field_type) in &def.fields {
            let value = match fields.get(field) {
                Some(value) => self.convert(&format!("{column}.{field}"), field_type, value)?,
                None => CqlValue::Null,
            };
            out.push((field.clone(), value));
        }
        Ok(CqlValue::Udt(UdtValue {
            keyspace: keyspace.clone(),
            type_name: name.to_string(),
            fields: out,
        }))
    }

    fn mismatch(&self, column: &str, expected: &ColumnType, actual: &str) -> DaoError {
        DaoError::TypeMismatch {
            table: self.entry.table().to_string(),
            column: column.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
