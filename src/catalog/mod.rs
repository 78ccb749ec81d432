pub mod schema;
pub mod types;

use crate::cache::SingleFlightLru;
use crate::catalog::schema::{ColumnMeta, TableIdentity, TableSchema, UdtDef};
use crate::catalog::types::ColumnType;
use crate::config::EngineConfig;
use crate::error::DaoError;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Column metadata of one table, as loaded at `loaded_at`.
#[derive(Debug, Clone)]
pub struct ColumnCatalogEntry {
    table: TableIdentity,
    columns: Vec<ColumnMeta>,
    positions: HashMap<String, usize>,
    loaded_at: Instant,
}

impl ColumnCatalogEntry {
    pub fn from_schema(schema: TableSchema, loaded_at: Instant) -> Self {
        let positions = schema
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.name.clone(), idx))
            .collect();
        Self {
            table: schema.identity,
            columns: schema.columns,
            positions,
            loaded_at,
        }
    }

    pub fn table(&self) -> &TableIdentity {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Result<&ColumnMeta, DaoError> {
        self.positions
            .get(name)
            .map(|&idx| &self.columns[idx])
            .ok_or_else(|| DaoError::UnknownColumn {
                table: self.table.to_string(),
                column: name.to_string(),
            })
    }

    pub fn column_type(&self, name: &str) -> Result<&ColumnType, DaoError> {
        self.column(name).map(|c| &c.column_type)
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.column(name).is_ok_and(ColumnMeta::is_primary_key)
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| c.is_primary_key())
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn is_expired(&self, now: Instant, expiry: Duration) -> bool {
        now.saturating_duration_since(self.loaded_at) > expiry
    }
}

/// UDT definitions reachable from a set of column types, by name.
#[derive(Debug, Clone, Default)]
pub struct UdtDefs {
    defs: HashMap<String, Arc<UdtDef>>,
}

impl UdtDefs {
    pub fn get(&self, name: &str) -> Option<&UdtDef> {
        self.defs.get(name).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Admits at most one bulk invalidation per `min_interval`.
#[derive(Debug)]
pub struct InvalidationLimiter {
    min_interval: Duration,
    last: parking_lot::Mutex<Option<Instant>>,
}

impl InvalidationLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: parking_lot::Mutex::new(None),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock();
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Per-table column metadata and UDT definitions, loaded from the store on
/// first use.
///
/// Entries older than the configured expiry are still served; the first
/// caller to observe a stale entry starts one background refresh of every
/// stale table. Cheap to clone.
#[derive(Clone)]
pub struct MetadataCatalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    transport: Arc<dyn Transport>,
    expiry: Duration,
    tables: SingleFlightLru<TableIdentity, Arc<ColumnCatalogEntry>>,
    udts: SingleFlightLru<(String, String), Arc<UdtDef>>,
    refresh_running: AtomicBool,
    refreshes_started: AtomicU64,
    limiter: InvalidationLimiter,
}

impl MetadataCatalog {
    pub fn new(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                transport,
                expiry: config.metadata_expiry(),
                tables: SingleFlightLru::new(config.table_cache_capacity),
                udts: SingleFlightLru::new(config.udt_cache_capacity),
                refresh_running: AtomicBool::new(false),
                refreshes_started: AtomicU64::new(0),
                limiter: InvalidationLimiter::new(config.invalidation_min_interval()),
            }),
        }
    }

    pub async fn get_columns(
        &self,
        table: &TableIdentity,
    ) -> Result<Arc<ColumnCatalogEntry>, DaoError> {
        let inner = &self.inner;
        let entry = inner
            .tables
            .get_or_try_load(table.clone(), || inner.load_table(table.clone()))
            .await?;
        if entry.is_expired(Instant::now(), inner.expiry) {
            self.schedule_refresh();
        }
        Ok(entry)
    }

    pub async fn get_udt(&self, keyspace: &str, name: &str) -> Result<Arc<UdtDef>, DaoError> {
        let inner = &self.inner;
        let key = (keyspace.to_string(), name.to_string());
        inner
            .udts
            .get_or_try_load(key, || async {
                tracing::debug!(keyspace, udt = name, "loading user defined type");
                match inner.transport.describe_type(keyspace, name).await {
                    Ok(Some(def)) => Ok(Arc::new(def)),
                    Ok(None) => Err(DaoError::TypeNotFound {
                        keyspace: keyspace.to_string(),
                        name: name.to_string(),
                    }),
                    Err(err) => Err(DaoError::from(err)),
                }
            })
            .await
    }

    /// Loads every UDT reachable from `types`, including UDTs nested in
    /// other UDTs' fields.
    pub async fn resolve_udts<'a>(
        &self,
        keyspace: &str,
        types: impl IntoIterator<Item = &'a ColumnType>,
    ) -> Result<UdtDefs, DaoError> {
        let mut pending = Vec::new();
        for ty in types {
            ty.collect_udt_names(&mut pending);
        }
        let mut resolved = UdtDefs::default();
        while let Some(name) = pending.pop() {
            if resolved.defs.contains_key(&name) {
                continue;
            }
            let def = self.get_udt(keyspace, &name).await?;
            for (_, field_type) in &def.fields {
                field_type.collect_udt_names(&mut pending);
            }
            resolved.defs.insert(name, def);
        }
        Ok(resolved)
    }

    /// Drops every cached table and UDT, at most once per invalidation
    /// interval. Returns whether the caches were actually cleared.
    pub fn invalidate_all(&self) -> bool {
        if !self.inner.limiter.try_acquire() {
            tracing::debug!("metadata invalidation suppressed by rate limit");
            return false;
        }
        self.inner.tables.clear();
        self.inner.udts.clear();
        tracing::warn!("metadata caches invalidated");
        true
    }

    pub fn cached_table_count(&self) -> usize {
        self.inner.tables.len()
    }

    pub fn is_refresh_running(&self) -> bool {
        self.inner.refresh_running.load(Ordering::Acquire)
    }

    pub fn refreshes_started(&self) -> u64 {
        self.inner.refreshes_started.load(Ordering::Relaxed)
    }

    fn schedule_refresh(&self) {
        if self
            .inner
            .refresh_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime available; skipping metadata refresh");
            self.inner.refresh_running.store(false, Ordering::Release);
            return;
        };
        self.inner.refreshes_started.fetch_add(1, Ordering::Relaxed);
        let guard = RefreshGuard(Arc::clone(&self.inner));
        handle.spawn(async move {
            guard.0.refresh_stale_tables().await;
            drop(guard);
        });
    }
}

/// Clears the refresh flag however the refresh task ends.
struct RefreshGuard(Arc<CatalogInner>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.refresh_running.store(false, Ordering::Release);
    }
}

impl CatalogInner {
    async fn load_table(&self, table: TableIdentity) -> Result<Arc<ColumnCatalogEntry>, DaoError> {
        tracing::debug!(table = %table, "loading table metadata");
        match self.transport.describe_table(&table).await? {
            Some(schema) => Ok(Arc::new(ColumnCatalogEntry::from_schema(
                schema,
                Instant::now(),
            ))),
            None => Err(DaoError::TableNotFound {
                table: table.to_string(),
            }),
        }
    }

    async fn refresh_stale_tables(&self) {
        let now = Instant::now();
        for (table, entry) in self.tables.loaded() {
            if !entry.is_expired(now, self.expiry) {
                continue;
            }
            match self.transport.describe_table(&table).await {
                Ok(Some(schema)) => {
                    tracing::debug!(table = %table, "table metadata refreshed");
                    self.tables.insert(
                        table,
                        Arc::new(ColumnCatalogEntry::from_schema(schema, Instant::now())),
                    );
                }
                Ok(None) => {
                    tracing::warn!(table = %table, "table disappeared; dropping cached metadata");
                    self.tables.remove(&table);
                }
                Err(err) => {
                    tracing::warn!(
                        table = %table,
                        error = %err,
                        "metadata refresh failed; keeping stale entry"
                    );
                }
            }
        }
    }
}
