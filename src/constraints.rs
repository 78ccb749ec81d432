//! Column-level constraints enforced before a write is compiled.

use crate::error::DaoError;
use crate::interceptor::WriteRequestInterceptor;
use crate::query::spec::WriteSpec;
use async_trait::async_trait;
use im::OrdSet;

/// Rejects inserts missing a NOT NULL column and updates touching an
/// immutable column.
///
/// A write counts as an insert when it is guarded by if-not-exists or names
/// neither keys nor where-conditions; every other write is an update.
#[derive(Debug, Clone, Default)]
pub struct ConstraintsInterceptor {
    not_null: OrdSet<String>,
    immutable: OrdSet<String>,
}

impl ConstraintsInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_not_null_column(mut self, column: &str) -> Self {
        self.not_null.insert(column.to_string());
        self
    }

    pub fn with_immutable_column(mut self, column: &str) -> Self {
        self.immutable.insert(column.to_string());
        self
    }

    fn is_set(spec: &WriteSpec, column: &str) -> bool {
        let assigned = spec
            .values_to_set()
            .get(column)
            .or_else(|| spec.keys().get(column))
            .is_some_and(|value| !value.is_null());
        assigned
            || spec.set_adds().contains_key(column)
            || spec.list_appends().contains_key(column)
            || spec.list_prepends().contains_key(column)
            || spec.map_puts().contains_key(column)
    }

    fn check(&self, spec: &WriteSpec) -> Result<(), DaoError> {
        if spec.is_update_intent() {
            if let Some(column) = spec
                .mutated_columns()
                .find(|column| self.immutable.contains(*column))
            {
                return Err(DaoError::Constraint(format!(
                    "immutable column {column} can not be updated"
                )));
            }
            let nulled: Vec<&str> = spec
                .values_to_set()
                .iter()
                .filter(|(column, value)| value.is_null() && self.not_null.contains(*column))
                .map(|(column, _)| column.as_str())
                .collect();
            if !nulled.is_empty() {
                return Err(DaoError::Constraint(format!(
                    "NOT NULL column(s) {} has to be set",
                    nulled.join(", ")
                )));
            }
            return Ok(());
        }

        let missing: Vec<&str> = self
            .not_null
            .iter()
            .filter(|column| !Self::is_set(spec, column))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DaoError::Constraint(format!(
                "NOT NULL column(s) {} has to be set",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WriteRequestInterceptor for ConstraintsInterceptor {
    async fn on_write_request(&self, spec: WriteSpec) -> Result<WriteSpec, DaoError> {
        self.check(&spec)?;
        Ok(spec)
    }

    fn name(&self) -> &str {
        "constraints"
    }
}
