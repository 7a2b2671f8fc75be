//! Sends one task and decides what happens next.
//!
//! A task is retried in place after timeouts, connection failures and, for
//! single items, throttling. A multi-item task that is throttled or hits a
//! gateway error is halved; the halves go back to the dispatcher as new work
//! instead of being run recursively on the current worker.

use std::sync::Arc;

use http::HeaderMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::chunk::Task;
use crate::error::ApiError;
use crate::metrics::EngineMetrics;
use crate::model::Payload;
use crate::retry::{FailureCategory, RetryTracker};
use crate::transport::{
    apply_body_headers, encode_items, ApiRequest, ApiResponse, CredentialProvider, EncodedBody,
    Transport, TransportError,
};

/// Terminal result of one leaf task.
#[derive(Debug)]
pub enum TaskOutcome<I> {
    /// The server accepted the task.
    Success {
        /// The task as sent.
        task: Task<I>,
        /// Raw entries of the response `items` array.
        results: Vec<Value>,
    },
    /// The task failed and will not be retried.
    Failure {
        /// The task as last attempted.
        task: Task<I>,
        /// Why it failed.
        error: Arc<ApiError>,
    },
}

impl<I> TaskOutcome<I> {
    /// Task this outcome belongs to.
    pub fn task(&self) -> &Task<I> {
        match self {
            TaskOutcome::Success { task, .. } | TaskOutcome::Failure { task, .. } => task,
        }
    }

    /// Whether the task failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure { .. })
    }
}

/// What the dispatcher should do after one run of [`execute`].
#[derive(Debug)]
pub enum Step<I> {
    /// The task reached a terminal outcome.
    Done(TaskOutcome<I>),
    /// The task was halved; both halves need dispatching.
    Split(Task<I>, Task<I>),
}

/// Everything a worker needs to send tasks of one call.
pub struct RequestContext {
    /// Transport used for every attempt.
    pub transport: Arc<dyn Transport>,
    /// Refreshes the credential before each backoff.
    pub credentials: Arc<dyn CredentialProvider>,
    /// Shared headers, credential included.
    pub headers: Arc<RwLock<HeaderMap>>,
    /// Endpoint path.
    pub path: &'static str,
    /// Extra top-level body fields next to `items`.
    pub extra: Map<String, Value>,
    /// Whether to gzip request bodies.
    pub compress: bool,
    /// Observer for requests, retries and splits.
    pub metrics: Arc<dyn EngineMetrics>,
}

impl RequestContext {
    fn request(&self, body: &EncodedBody) -> ApiRequest {
        let mut headers = self.headers.read().clone();
        apply_body_headers(&mut headers, body.gzip);
        ApiRequest {
            path: self.path,
            body: body.bytes.clone(),
            headers,
        }
    }

    fn pause(&self, tracker: &RetryTracker) {
        self.credentials.refresh_header(&mut self.headers.write());
        let sleep = tracker.backoff_duration();
        self.metrics.backoff(sleep);
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        }
    }
}

/// Runs `task` until it succeeds, fails terminally, or has to be split.
pub fn execute<I: Payload>(ctx: &RequestContext, mut task: Task<I>) -> Step<I> {
    let body = match encode_items(task.items(), &ctx.extra, ctx.compress) {
        Ok(body) => body,
        Err(err) => return fail(ctx, task, err),
    };

    loop {
        debug!(
            path = ctx.path,
            items = task.len(),
            offset = task.offset(),
            "sending task"
        );
        ctx.metrics.request_sent(task.len());
        let (category, source) = match ctx.transport.send(&ctx.request(&body)) {
            Ok(response) => match classify(&response) {
                Reply::Accepted => {
                    return match response.items() {
                        Ok(results) => {
                            ctx.metrics.task_succeeded(task.len());
                            Step::Done(TaskOutcome::Success { task, results })
                        }
                        Err(err) => fail(ctx, task, err),
                    };
                }
                Reply::Unauthorized => {
                    let err = ApiError::Unauthorized {
                        message: response.error_message(),
                        request_id: response.request_id(),
                    };
                    return fail(ctx, task, err);
                }
                Reply::Throttled => {
                    if !task.tracker.should_retry(FailureCategory::Status) {
                        warn!(
                            status = %response.status,
                            items = task.len(),
                            "status retry budget exhausted"
                        );
                        let err = ApiError::RetriesExhausted {
                            status: response.status,
                            message: response.error_message(),
                            request_id: response.request_id(),
                            payload: body.json,
                        };
                        return fail(ctx, task, err);
                    }
                    ctx.metrics.retry_scheduled(FailureCategory::Status);
                    if task.len() > 1 {
                        debug!(status = %response.status, items = task.len(), "splitting task");
                        ctx.metrics.task_split(task.len());
                        ctx.pause(&task.tracker);
                        match task.split() {
                            Ok((left, right)) => return Step::Split(left, right),
                            Err(unsplit) => task = unsplit,
                        }
                    } else {
                        warn!(status = %response.status, "retrying single item in place");
                        ctx.pause(&task.tracker);
                    }
                    continue;
                }
                Reply::Rejected => {
                    let err = ApiError::Api {
                        status: response.status,
                        message: response.error_message(),
                        request_id: response.request_id(),
                        payload: body.json,
                    };
                    return fail(ctx, task, err);
                }
            },
            Err(err @ TransportError::Timeout(_)) => (FailureCategory::Read, err),
            Err(err @ TransportError::Connect(_)) => (FailureCategory::Connect, err),
            Err(other) => return fail(ctx, task, ApiError::Transport(other)),
        };

        if !task.tracker.should_retry(category) {
            warn!(%category, items = task.len(), "transport retry budget exhausted");
            return fail(ctx, task, ApiError::TransportExhausted { category, source });
        }
        warn!(%category, error = %source, "transport failure, retrying");
        ctx.metrics.retry_scheduled(category);
        ctx.pause(&task.tracker);
    }
}

enum Reply {
    Accepted,
    Unauthorized,
    Throttled,
    Rejected,
}

fn classify(response: &ApiResponse) -> Reply {
    match response.status.as_u16() {
        200 | 201 | 202 | 204 => Reply::Accepted,
        401 => Reply::Unauthorized,
        _ if ApiError::is_retryable_status(response.status) => Reply::Throttled,
        _ => Reply::Rejected,
    }
}

fn fail<I>(ctx: &RequestContext, task: Task<I>, error: ApiError) -> Step<I> {
    debug!(items = task.len(), offset = task.offset(), %error, "task failed");
    ctx.metrics.task_failed(task.len());
    Step::Done(TaskOutcome::Failure {
        task,
        error: Arc::new(error),
    })
}
