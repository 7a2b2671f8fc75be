#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use graphbulk::metrics::CounterMetrics;
use graphbulk::{
    ApiRequest, ApiResponse, CredentialProvider, EngineConfig, InstanceId, InstancesClient,
    NoCredentials, Node, PropertyValue, Record, SourceData, Transport, TransportError, ViewRef,
};
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING};
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::{json, Value};

/// One request as the fake API saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub seq: usize,
    pub path: &'static str,
    pub body: Value,
    pub headers: HeaderMap,
}

impl Call {
    pub fn items(&self) -> &[Value] {
        self.body["items"].as_array().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.items()
            .iter()
            .any(|item| item["externalId"] == external_id)
    }

    pub fn token(&self) -> Option<String> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

type Handler = dyn Fn(&Call) -> Result<ApiResponse, TransportError> + Send + Sync;

/// In-memory API driven by a closure; records every call and the peak number
/// of concurrent requests.
pub struct FakeApi {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
    seq: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl FakeApi {
    pub fn new(
        handler: impl Fn(&Call) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_latency(Duration::ZERO, handler)
    }

    pub fn with_latency(
        latency: Duration,
        handler: impl Fn(&Call) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            seq: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            latency,
        })
    }

    /// Accepts everything and echoes results.
    pub fn accepting() -> Arc<Self> {
        Self::new(|call| Ok(echo(call)))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for FakeApi {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let call = Call {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            path: request.path,
            body: decode_body(request),
            headers: request.headers.clone(),
        };
        self.calls.lock().push(call.clone());
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let response = (self.handler)(&call);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

fn decode_body(request: &ApiRequest) -> Value {
    let gzip = request.headers.get(CONTENT_ENCODING) == Some(&HeaderValue::from_static("gzip"));
    if gzip {
        let mut text = String::new();
        GzDecoder::new(&request.body[..])
            .read_to_string(&mut text)
            .unwrap();
        serde_json::from_str(&text).unwrap()
    } else {
        serde_json::from_slice(&request.body).unwrap()
    }
}

/// 200 with one result per request item, shaped like the real endpoints.
pub fn echo(call: &Call) -> ApiResponse {
    let items: Vec<Value> = call
        .items()
        .iter()
        .map(|item| {
            if call.path.ends_with("/delete") {
                item.clone()
            } else {
                json!({
                    "instanceType": item["instanceType"],
                    "space": item["space"],
                    "externalId": item["externalId"],
                    "version": 1,
                    "wasModified": true,
                    "createdTime": 1_700_000_000_000i64,
                    "lastUpdatedTime": 1_700_000_000_000i64,
                })
            }
        })
        .collect();
    ApiResponse::json(StatusCode::OK, &json!({ "items": items }))
}

/// Error response in the API's `{"error": {...}}` envelope.
pub fn status(code: u16, message: &str) -> ApiResponse {
    let status = StatusCode::from_u16(code).unwrap();
    ApiResponse::json(
        status,
        &json!({"error": {"code": code, "message": message}}),
    )
}

/// Credential provider that rotates its token on every refresh.
#[derive(Default)]
pub struct RotatingToken {
    pub refreshes: AtomicUsize,
}

impl CredentialProvider for RotatingToken {
    fn refresh_header(&self, headers: &mut HeaderMap) {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
        let value = HeaderValue::from_str(&format!("Bearer token-{n}")).unwrap();
        headers.insert(AUTHORIZATION, value);
    }
}

/// Config with no sleeping and plain JSON bodies.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .backoff(0.0, 0.0)
        .jitter(false)
        .compress(false)
}

pub fn client(api: &Arc<FakeApi>, config: EngineConfig) -> (InstancesClient, Arc<CounterMetrics>) {
    let metrics = Arc::new(CounterMetrics::default());
    let client = InstancesClient::new(api.clone(), Arc::new(NoCredentials), config)
        .unwrap()
        .with_metrics(metrics.clone());
    (client, metrics)
}

pub fn nodes(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Node::new("test", format!("n{i}"))
                .with_source(
                    SourceData::new(ViewRef::view("test", "Asset", "v1"))
                        .with("index", PropertyValue::Int(i as i64)),
                )
                .into()
        })
        .collect()
}

pub fn node_ids(n: usize) -> Vec<InstanceId> {
    (0..n)
        .map(|i| InstanceId::node("test", format!("n{i}")))
        .collect()
}

pub fn count(counter: &std::sync::atomic::AtomicU64) -> u64 {
    counter.load(Ordering::SeqCst)
}
