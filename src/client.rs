//! Public entry points: bulk upsert and bulk delete.

use std::sync::Arc;

use http::HeaderMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::aggregate;
use crate::chunk::chunk;
use crate::config::EngineConfig;
use crate::error::{ApiError, Result};
use crate::executor::RequestContext;
use crate::metrics::{default_metrics, EngineMetrics};
use crate::model::{InstanceId, InstanceResult, Payload, Record};
use crate::pool::{delete_executor, write_executor, TaskExecutor};
use crate::transport::{CredentialProvider, Transport, APPLY_PATH, DELETE_PATH};

/// Writes and deletes graph instances in bulk.
///
/// Input is chunked to the endpoint limits, sent on the shared worker pools,
/// and split or retried as the server pushes back. A call either returns one
/// entry per input item, in input order, or fails with
/// [`crate::CompoundError`] accounting for every item.
pub struct InstancesClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    headers: Arc<RwLock<HeaderMap>>,
    config: EngineConfig,
    metrics: Arc<dyn EngineMetrics>,
}

impl InstancesClient {
    /// Creates a client after validating `config`.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut headers = HeaderMap::new();
        credentials.refresh_header(&mut headers);
        Ok(Self {
            transport,
            credentials,
            headers: Arc::new(RwLock::new(headers)),
            config,
            metrics: default_metrics(),
        })
    }

    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the headers sent with the next request.
    pub fn headers(&self) -> HeaderMap {
        self.headers.read().clone()
    }

    /// Upserts nodes and edges.
    pub fn apply_fast(&self, records: impl Into<Arc<[Record]>>) -> Result<Vec<InstanceResult>> {
        self.apply_with(records.into(), write_executor())
    }

    /// Deletes instances, returning the identities the server confirmed.
    pub fn delete_fast(&self, ids: impl Into<Arc<[InstanceId]>>) -> Result<Vec<InstanceId>> {
        self.delete_with(ids.into(), delete_executor())
    }

    pub(crate) fn apply_with(
        &self,
        records: Arc<[Record]>,
        executor: TaskExecutor,
    ) -> Result<Vec<InstanceResult>> {
        self.bulk(
            records,
            APPLY_PATH,
            self.config.create_limit,
            self.config.apply.to_body_fields(),
            executor,
            InstanceResult::decode,
        )
    }

    pub(crate) fn delete_with(
        &self,
        ids: Arc<[InstanceId]>,
        executor: TaskExecutor,
    ) -> Result<Vec<InstanceId>> {
        self.bulk(
            ids,
            DELETE_PATH,
            self.config.delete_limit,
            Map::new(),
            executor,
            InstanceId::decode,
        )
    }

    fn bulk<I, T>(
        &self,
        items: Arc<[I]>,
        path: &'static str,
        limit: usize,
        extra: Map<String, Value>,
        executor: TaskExecutor,
        decode: fn(&Value) -> std::result::Result<T, ApiError>,
    ) -> Result<Vec<T>>
    where
        I: Payload,
    {
        if items.is_empty() {
            debug!(path, "nothing to send");
            return Ok(Vec::new());
        }
        let tasks = chunk(items, limit, &self.config.policy());
        let ctx = Arc::new(RequestContext {
            transport: Arc::clone(&self.transport),
            credentials: Arc::clone(&self.credentials),
            headers: Arc::clone(&self.headers),
            path,
            extra,
            compress: self.config.compress,
            metrics: Arc::clone(&self.metrics),
        });
        let summary = aggregate::run(tasks, executor, self.config.max_workers, ctx);
        summary.into_results(decode, Payload::instance_id)
    }
}
