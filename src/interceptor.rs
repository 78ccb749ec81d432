//! Middleware around request compilation and read results.
//!
//! Interceptors register against one capability role each. Request
//! interceptors of a role run in registration order, each receiving the
//! previous one's output. Response interceptors run in registration order
//! after a read. Cascade interceptors run concurrently once the primary spec
//! is final, and their mutations join the primary statement's batch.

use crate::error::DaoError;
use crate::query::spec::{CounterSpec, DeleteSpec, MutationSpec, ReadSpec, WriteSpec};
use crate::records::Records;
use async_trait::async_trait;
use futures::future::try_join_all;
use im::Vector;
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait WriteRequestInterceptor: Send + Sync {
    async fn on_write_request(&self, spec: WriteSpec) -> Result<WriteSpec, DaoError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
pub trait DeleteRequestInterceptor: Send + Sync {
    async fn on_delete_request(&self, spec: DeleteSpec) -> Result<DeleteSpec, DaoError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
pub trait ReadRequestInterceptor: Send + Sync {
    async fn on_read_request(&self, spec: ReadSpec) -> Result<ReadSpec, DaoError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Transforms a read result. May replace the rows but never re-issues the
/// read.
#[async_trait]
pub trait ReadResponseInterceptor: Send + Sync {
    async fn on_read_response(
        &self,
        spec: &ReadSpec,
        records: Records,
    ) -> Result<Records, DaoError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
pub trait CascadeOnWriteInterceptor: Send + Sync {
    async fn on_write(&self, spec: &WriteSpec) -> Result<Vec<Batchable>, DaoError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
pub trait CascadeOnDeleteInterceptor: Send + Sync {
    async fn on_delete(&self, spec: &DeleteSpec) -> Result<Vec<Batchable>, DaoError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Interceptors of a DAO, grouped by role. Cloning shares the interceptors;
/// registering returns a new registry and leaves the original untouched.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    write_requests: Vector<Arc<dyn WriteRequestInterceptor>>,
    delete_requests: Vector<Arc<dyn DeleteRequestInterceptor>>,
    read_requests: Vector<Arc<dyn ReadRequestInterceptor>>,
    read_responses: Vector<Arc<dyn ReadResponseInterceptor>>,
    cascades_on_write: Vector<Arc<dyn CascadeOnWriteInterceptor>>,
    cascades_on_delete: Vector<Arc<dyn CascadeOnDeleteInterceptor>>,
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("write_requests", &self.write_requests.len())
            .field("delete_requests", &self.delete_requests.len())
            .field("read_requests", &self.read_requests.len())
            .field("read_responses", &self.read_responses.len())
            .field("cascades_on_write", &self.cascades_on_write.len())
            .field("cascades_on_delete", &self.cascades_on_delete.len())
            .finish()
    }
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_request(mut self, interceptor: Arc<dyn WriteRequestInterceptor>) -> Self {
        self.write_requests.push_back(interceptor);
        self
    }

    pub fn with_delete_request(mut self, interceptor: Arc<dyn DeleteRequestInterceptor>) -> Self {
        self.delete_requests.push_back(interceptor);
        self
    }

    pub fn with_read_request(mut self, interceptor: Arc<dyn ReadRequestInterceptor>) -> Self {
        self.read_requests.push_back(interceptor);
        self
    }

    pub fn with_read_response(mut self, interceptor: Arc<dyn ReadResponseInterceptor>) -> Self {
        self.read_responses.push_back(interceptor);
        self
    }

    pub fn with_cascade_on_write(
        mut self,
        interceptor: Arc<dyn CascadeOnWriteInterceptor>,
    ) -> Self {
        self.cascades_on_write.push_back(interceptor);
        self
    }

    pub fn with_cascade_on_delete(
        mut self,
        interceptor: Arc<dyn CascadeOnDeleteInterceptor>,
    ) -> Self {
        self.cascades_on_delete.push_back(interceptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.write_requests.is_empty()
            && self.delete_requests.is_empty()
            && self.read_requests.is_empty()
            && self.read_responses.is_empty()
            && self.cascades_on_write.is_empty()
            && self.cascades_on_delete.is_empty()
    }

    pub async fn apply_write_request(&self, mut spec: WriteSpec) -> Result<WriteSpec, DaoError> {
        for interceptor in &self.write_requests {
            tracing::trace!(interceptor = interceptor.name(), "write request interceptor");
            spec = interceptor.on_write_request(spec).await?;
        }
        Ok(spec)
    }

    pub async fn apply_delete_request(&self, mut spec: DeleteSpec) -> Result<DeleteSpec, DaoError> {
        for interceptor in &self.delete_requests {
            tracing::trace!(interceptor = interceptor.name(), "delete request interceptor");
            spec = interceptor.on_delete_request(spec).await?;
        }
        Ok(spec)
    }

    pub async fn apply_read_request(&self, mut spec: ReadSpec) -> Result<ReadSpec, DaoError> {
        for interceptor in &self.read_requests {
            tracing::trace!(interceptor = interceptor.name(), "read request interceptor");
            spec = interceptor.on_read_request(spec).await?;
        }
        Ok(spec)
    }

    pub async fn apply_read_response(
        &self,
        spec: &ReadSpec,
        mut records: Records,
    ) -> Result<Records, DaoError> {
        for interceptor in &self.read_responses {
            tracing::trace!(interceptor = interceptor.name(), "read response interceptor");
            records = interceptor.on_read_response(spec, records).await?;
        }
        Ok(records)
    }

    /// Runs every cascade-on-write interceptor concurrently and waits for all
    /// of them. The first failure is returned as is.
    pub async fn cascade_on_write(&self, spec: &WriteSpec) -> Result<Vec<Batchable>, DaoError> {
        let produced =
            try_join_all(self.cascades_on_write.iter().map(|c| c.on_write(spec))).await?;
        Ok(produced.into_iter().flatten().collect())
    }

    pub async fn cascade_on_delete(&self, spec: &DeleteSpec) -> Result<Vec<Batchable>, DaoError> {
        let produced =
            try_join_all(self.cascades_on_delete.iter().map(|c| c.on_delete(spec))).await?;
        Ok(produced.into_iter().flatten().collect())
    }
}

/// A mutation that can join an atomic batch, together with the interceptors
/// of the DAO that produced it.
#[derive(Debug, Clone)]
pub struct Batchable {
    spec: MutationSpec,
    interceptors: InterceptorRegistry,
}

impl Batchable {
    pub fn new(spec: impl Into<MutationSpec>) -> Self {
        Self {
            spec: spec.into(),
            interceptors: InterceptorRegistry::default(),
        }
    }

    pub fn with_interceptors(mut self, interceptors: InterceptorRegistry) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn spec(&self) -> &MutationSpec {
        &self.spec
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    pub(crate) fn into_parts(self) -> (MutationSpec, InterceptorRegistry) {
        (self.spec, self.interceptors)
    }
}

impl From<WriteSpec> for Batchable {
    fn from(spec: WriteSpec) -> Self {
        Batchable::new(spec)
    }
}

impl From<DeleteSpec> for Batchable {
    fn from(spec: DeleteSpec) -> Self {
        Batchable::new(spec)
    }
}

impl From<CounterSpec> for Batchable {
    fn from(spec: CounterSpec) -> Self {
        Batchable::new(spec)
    }
}
