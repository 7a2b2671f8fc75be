//! Collaborator seams: the HTTP transport and the credential source.
//!
//! The engine owns every retry decision, so a [`Transport`] must not retry on
//! its own. Request encoding (JSON, optional gzip) also lives here.

use std::io::Write;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ApiError;
use crate::model::Payload;

/// Path of the upsert endpoint.
pub const APPLY_PATH: &str = "/models/instances";
/// Path of the delete endpoint.
pub const DELETE_PATH: &str = "/models/instances/delete";

/// Failure below the HTTP layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request was sent but the response did not arrive in time.
    #[error("read timed out: {0}")]
    Timeout(String),
    /// The connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Anything else; never retried.
    #[error("transport error: {0}")]
    Other(String),
}

/// Request handed to the transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Endpoint path, e.g. [`APPLY_PATH`].
    pub path: &'static str,
    /// Encoded body, gzip-compressed when `Content-Encoding` says so.
    pub body: Bytes,
    /// Headers, including the current credential.
    pub headers: HeaderMap,
}

/// Response returned by the transport.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Response with a JSON body.
    pub fn json(status: StatusCode, body: &Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    /// `x-request-id` header, if present.
    pub fn request_id(&self) -> Option<String> {
        self.headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Error message from `{"error":{"message":..}}`, else the body text.
    pub fn error_message(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| text.into_owned())
    }

    /// Entries of the `items` array of a success body.
    pub fn items(&self) -> Result<Vec<Value>, ApiError> {
        if self.body.is_empty() {
            return Ok(Vec::new());
        }
        let mut decoded: Value = serde_json::from_slice(&self.body)
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        match decoded.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(ApiError::Decode(format!(
                "expected `items` array, found {other}"
            ))),
        }
    }
}

/// Sends one request without retrying.
pub trait Transport: Send + Sync {
    /// Executes `request` exactly once.
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Keeps the credential header current.
pub trait CredentialProvider: Send + Sync {
    /// Updates `headers` with a valid credential; cheap when nothing expired.
    fn refresh_header(&self, headers: &mut HeaderMap);
}

/// Fixed bearer token.
pub struct StaticToken {
    value: Option<HeaderValue>,
}

impl StaticToken {
    /// Provider that always sends `Authorization: Bearer <token>`.
    pub fn new(token: &str) -> Self {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).ok();
        if value.is_none() {
            tracing::warn!("bearer token contains invalid header characters; sending none");
        }
        Self { value }
    }
}

impl CredentialProvider for StaticToken {
    fn refresh_header(&self, headers: &mut HeaderMap) {
        if let Some(value) = &self.value {
            if headers.get(AUTHORIZATION) != Some(value) {
                headers.insert(AUTHORIZATION, value.clone());
            }
        }
    }
}

/// Credential provider for endpoints that need none.
#[derive(Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn refresh_header(&self, _headers: &mut HeaderMap) {}
}

/// Encoded request body plus the JSON text kept for diagnostics.
pub(crate) struct EncodedBody {
    pub bytes: Bytes,
    pub json: String,
    pub gzip: bool,
}

/// Serializes `{"items": [...], ..extra}` and compresses it if asked.
///
/// Non-finite numbers are rejected up front: JSON cannot carry them.
pub(crate) fn encode_items<I: Payload>(
    items: &[I],
    extra: &Map<String, Value>,
    compress: bool,
) -> Result<EncodedBody, ApiError> {
    if let Some(path) = items.iter().find_map(Payload::non_finite_path) {
        return Err(ApiError::NonFiniteValue { path });
    }

    #[derive(Serialize)]
    struct Body<'a, I: Serialize> {
        items: &'a [I],
        #[serde(flatten)]
        extra: &'a Map<String, Value>,
    }

    let json = serde_json::to_string(&Body { items, extra })
        .map_err(|err| ApiError::Serialization(err.to_string()))?;
    if !compress {
        return Ok(EncodedBody {
            bytes: Bytes::from(json.clone()),
            json,
            gzip: false,
        });
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder
        .write_all(json.as_bytes())
        .and_then(|_| encoder.finish())
        .map(|compressed| EncodedBody {
            bytes: Bytes::from(compressed),
            json,
            gzip: true,
        })
        .map_err(|err| ApiError::Serialization(format!("gzip: {err}")))
}

/// Headers every request carries on top of the shared credential headers.
pub(crate) fn apply_body_headers(headers: &mut HeaderMap, gzip: bool) {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if gzip {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    } else {
        headers.remove(CONTENT_ENCODING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceId, Node, PropertyValue, Record, SourceData, ViewRef};
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn encodes_items_with_options() {
        let mut extra = Map::new();
        extra.insert("replace".into(), Value::Bool(true));
        let body = encode_items(&[InstanceId::node("s", "a")], &extra, false).unwrap();
        let decoded: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(
            decoded,
            json!({"items": [{"space": "s", "externalId": "a", "instanceType": "node"}], "replace": true})
        );
        assert!(!body.gzip);
    }

    #[test]
    fn gzip_round_trips_to_the_same_json() {
        let ids: Vec<_> = (0..50).map(|i| InstanceId::edge("s", format!("e{i}"))).collect();
        let body = encode_items(&ids, &Map::new(), true).unwrap();
        assert!(body.gzip);
        let mut text = String::new();
        GzDecoder::new(&body.bytes[..])
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, body.json);
    }

    #[test]
    fn non_finite_numbers_are_a_data_error() {
        let record = Record::from(Node::new("s", "bad").with_source(
            SourceData::new(ViewRef::view("s", "V", "1")).with("x", PropertyValue::Float(f64::NAN)),
        ));
        let err = encode_items(&[record], &Map::new(), false).err().unwrap();
        assert!(matches!(err, ApiError::NonFiniteValue { ref path } if path == "s:bad/x"));
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn error_message_prefers_api_error_field() {
        let resp = ApiResponse::json(
            StatusCode::BAD_REQUEST,
            &json!({"error": {"code": 400, "message": "Invalid view reference"}}),
        );
        assert_eq!(resp.error_message(), "Invalid view reference");
        let raw = ApiResponse {
            status: StatusCode::BAD_GATEWAY,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"upstream down"),
        };
        assert_eq!(raw.error_message(), "upstream down");
    }

    #[test]
    fn static_token_sets_bearer_once() {
        let provider = StaticToken::new("abc");
        let mut headers = HeaderMap::new();
        provider.refresh_header(&mut headers);
        provider.refresh_header(&mut headers);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.len(), 1);
    }
}
