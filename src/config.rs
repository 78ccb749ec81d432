use crate::error::DaoError;
use crate::transport::Consistency;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Keyspace used for table names given without a `keyspace.` prefix.
    pub default_keyspace: Option<String>,
    pub metadata_expiry_ms: u64,
    pub invalidation_min_interval_ms: u64,
    pub table_cache_capacity: usize,
    pub udt_cache_capacity: usize,
    pub statement_cache_capacity: usize,
    pub default_consistency: Option<Consistency>,
    pub default_serial_consistency: Option<Consistency>,
    pub default_fetch_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_keyspace: None,
            metadata_expiry_ms: 96_000,
            invalidation_min_interval_ms: 1_600,
            table_cache_capacity: 150,
            udt_cache_capacity: 100,
            statement_cache_capacity: 150,
            default_consistency: None,
            default_serial_consistency: None,
            default_fetch_size: None,
        }
    }
}

impl EngineConfig {
    pub fn for_keyspace(keyspace: &str) -> Self {
        Self {
            default_keyspace: Some(keyspace.to_string()),
            ..Self::default()
        }
    }

    /// Short-lived metadata for schemas that change under the application,
    /// e.g. while iterating on a local cluster.
    pub fn development() -> Self {
        Self {
            metadata_expiry_ms: 5_000,
            invalidation_min_interval_ms: 100,
            default_consistency: Some(Consistency::One),
            ..Self::default()
        }
    }

    pub fn metadata_expiry(&self) -> Duration {
        Duration::from_millis(self.metadata_expiry_ms)
    }

    pub fn invalidation_min_interval(&self) -> Duration {
        Duration::from_millis(self.invalidation_min_interval_ms)
    }

    pub fn validate(&self) -> Result<(), DaoError> {
        if self.metadata_expiry_ms == 0 {
            return Err(DaoError::InvalidConfig {
                message: "metadata_expiry_ms must be > 0".into(),
            });
        }
        if self.table_cache_capacity == 0
            || self.udt_cache_capacity == 0
            || self.statement_cache_capacity == 0
        {
            return Err(DaoError::InvalidConfig {
                message: "cache capacities must be > 0".into(),
            });
        }
        if self.default_fetch_size == Some(0) {
            return Err(DaoError::InvalidConfig {
                message: "default_fetch_size must be > 0 when set".into(),
            });
        }
        if let Some(consistency) = self.default_serial_consistency
            && !consistency.is_serial()
        {
            return Err(DaoError::InvalidConfig {
                message: format!("{consistency} is not a serial consistency level"),
            });
        }
        if let Some(keyspace) = &self.default_keyspace
            && (keyspace.is_empty() || keyspace.contains('.'))
        {
            return Err(DaoError::InvalidConfig {
                message: format!("invalid default keyspace '{keyspace}'"),
            });
        }
        Ok(())
    }
}
