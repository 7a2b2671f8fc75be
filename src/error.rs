use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::InstanceId;
use crate::retry::FailureCategory;
use crate::transport::TransportError;

/// Result alias used by the public client surface.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by [`crate::InstancesClient`].
#[derive(Debug, Error)]
pub enum Error {
    /// One or more items could not be written or deleted.
    #[error(transparent)]
    Compound(#[from] CompoundError),
    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Engine configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A successful response carried an entry that could not be decoded.
    #[error("failed to decode response item: {0}")]
    Decode(String),
}

/// Terminal error for a single leaf task.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body holds a NaN or infinite number.
    #[error("payload contains a non-finite number at {path}; NaN and infinity cannot be sent")]
    NonFiniteValue {
        /// Location of the offending value, `space:externalId/property`.
        path: String,
    },
    /// The request body could not be encoded.
    #[error("failed to serialize request body: {0}")]
    Serialization(String),
    /// The server rejected the credentials.
    #[error("no access (401): {message}")]
    Unauthorized {
        /// Server supplied message.
        message: String,
        /// Value of the `x-request-id` response header.
        request_id: Option<String>,
    },
    /// A retryable status kept coming back until the budget ran out.
    #[error("retries exhausted ({status}): {message}")]
    RetriesExhausted {
        /// Last status observed.
        status: StatusCode,
        /// Server supplied message.
        message: String,
        /// Value of the `x-request-id` response header.
        request_id: Option<String>,
        /// JSON body that was in flight.
        payload: String,
    },
    /// Any other non-success status.
    #[error("request failed ({status}): {message}")]
    Api {
        /// Response status.
        status: StatusCode,
        /// Server supplied message.
        message: String,
        /// Value of the `x-request-id` response header.
        request_id: Option<String>,
        /// JSON body that was in flight.
        payload: String,
    },
    /// Timeouts or connection failures outlasted their retry budget.
    #[error("{category} retries exhausted: {source}")]
    TransportExhausted {
        /// Category whose budget ran out.
        category: FailureCategory,
        /// Last transport failure.
        source: TransportError,
    },
    /// A transport failure that is never retried.
    #[error(transparent)]
    Transport(TransportError),
    /// The success body was not the expected `{"items": [...]}` shape.
    #[error("malformed response body: {0}")]
    Decode(String),
    /// The worker running the task panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

impl ApiError {
    /// Statuses answered by halving or retrying the task.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }

    /// HTTP status attached to the error, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            ApiError::RetriesExhausted { status, .. } | ApiError::Api { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Request body that was in flight when the error was raised.
    pub fn payload(&self) -> Option<&str> {
        match self {
            ApiError::RetriesExhausted { payload, .. } | ApiError::Api { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }
}

/// Aggregate failure covering every item of every failed task.
///
/// Items that went through are listed in `successful`, so a caller can resubmit
/// exactly the keys of `failed`.
#[derive(Debug, Default)]
pub struct CompoundError {
    /// Identities confirmed by the server.
    pub successful: Vec<InstanceId>,
    /// Identities that failed, each mapped to the error of its task.
    pub failed: BTreeMap<InstanceId, Arc<ApiError>>,
}

impl CompoundError {
    /// Identities that ultimately failed, in key order.
    pub fn failed_ids(&self) -> Vec<InstanceId> {
        self.failed.keys().cloned().collect()
    }

    /// Distinct task errors, each once.
    pub fn errors(&self) -> Vec<Arc<ApiError>> {
        let mut seen: Vec<Arc<ApiError>> = Vec::new();
        for err in self.failed.values() {
            if !seen.iter().any(|known| Arc::ptr_eq(known, err)) {
                seen.push(Arc::clone(err));
            }
        }
        seen
    }

    /// Error recorded for `id`, if it failed.
    pub fn error_for(&self, id: &InstanceId) -> Option<&ApiError> {
        self.failed.get(id).map(|err| err.as_ref())
    }
}

impl fmt::Display for CompoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} item(s) failed, {} succeeded",
            self.failed.len(),
            self.successful.len()
        )?;
        for err in self.errors().iter().take(3) {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompoundError {}
