#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphbulk::{
    ApiRequest, ApiResponse, EngineConfig, InstanceId, InstancesClient, NoCredentials, Transport,
    TransportError,
};
use http::StatusCode;
use serde_json::{json, Value};

const ITEMS: usize = 4096;

/// Rejects batches above `capacity` with 429 and echoes the rest.
struct CappedApi {
    capacity: usize,
}

impl Transport for CappedApi {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let body: Value = serde_json::from_slice(&request.body)
            .map_err(|err| TransportError::Other(err.to_string()))?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        if items.len() > self.capacity {
            return Ok(ApiResponse::json(StatusCode::TOO_MANY_REQUESTS, &json!({})));
        }
        Ok(ApiResponse::json(StatusCode::OK, &json!({ "items": items })))
    }
}

fn split_retry(c: &mut Criterion) {
    let ids: Arc<[InstanceId]> = (0..ITEMS)
        .map(|i| InstanceId::node("bench", format!("n{i}")))
        .collect::<Vec<_>>()
        .into();
    let mut group = c.benchmark_group("engine/delete");
    group.sample_size(20);
    group.throughput(Throughput::Elements(ITEMS as u64));
    for capacity in [1000, 250, 64] {
        let config = EngineConfig::default()
            .backoff(0.0, 0.0)
            .jitter(false)
            .compress(false);
        let client = InstancesClient::new(
            Arc::new(CappedApi { capacity }),
            Arc::new(NoCredentials),
            config,
        )
        .expect("client");
        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            &capacity,
            |b, _| {
                b.iter(|| client.delete_fast(Arc::clone(&ids)).expect("delete"));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, split_retry);
criterion_main!(benches);
