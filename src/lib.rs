//! Graphbulk: bulk upsert and delete of graph instances against a rate-limited
//! remote API.
//!
//! Input is chunked to the per-request item limit, sent on process-wide worker
//! pools, halved when the server throttles, and retried with bounded
//! exponential backoff. The outcome of a call is either every result in input
//! order or one [`CompoundError`] naming the fate of every item.

#![warn(missing_docs)]

/// Dispatch loop and result folding.
pub mod aggregate;
/// Partitioning input into request-sized tasks.
pub mod chunk;
/// `InstancesClient`, the public entry point.
pub mod client;
/// Engine configuration and TOML loading.
pub mod config;
/// Error types.
pub mod error;
/// Single-task send, retry and split logic.
pub mod executor;
/// `tracing` subscriber setup.
pub mod logging;
/// Engine observation hooks.
pub mod metrics;
/// Nodes, edges, identities and typed results.
pub mod model;
/// Shared worker pools.
pub mod pool;
/// Retry budgets and backoff.
pub mod retry;
/// Transport and credential seams plus request encoding.
pub mod transport;

pub use client::InstancesClient;
pub use config::{ApplyOptions, ConfigError, EngineConfig};
pub use error::{ApiError, CompoundError, Error, Result};
pub use model::{
    AppliedInstance, DirectRef, Edge, InstanceId, InstanceKind, InstanceResult, Node, Payload,
    PropertyValue, Record, SourceData, ViewRef,
};
pub use transport::{
    ApiRequest, ApiResponse, CredentialProvider, NoCredentials, StaticToken, Transport,
    TransportError,
};
