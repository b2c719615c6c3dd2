//! Error types for the harness.

use std::time::Duration;
use thiserror::Error;

/// Error type for all harness operations.
///
/// Variants fall into three groups: transient transport conditions (retried
/// within a caller's polling budget, see [`Error::is_transient`]), bounded
/// failures surfaced as values by the verification engine, and hard
/// correctness violations that abort a scenario immediately and are never
/// retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http over unix socket: {0}")]
    Hyper(#[from] hyper::Error),
    #[error("request build: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{role} #{id} does not exist")]
    UnknownNode { role: &'static str, id: usize },
    #[error("failed to launch {name}: {reason}")]
    LaunchFailed { name: String, reason: String },
    #[error("{node} not ready within {timeout:?}")]
    NotReady { node: String, timeout: Duration },
    #[error("{node} response missing {field}: {body}")]
    MissingField {
        node: String,
        field: &'static str,
        body: String,
    },
    #[error("{node} has no block on record in 1..={target}")]
    NoBlocksOnRecord { node: String, target: u64 },
    #[error("{node} returned block {got} for requested block {want}")]
    BlockMismatch { node: String, want: u64, got: u64 },
    #[error("{field} differs between producer and {node}: {produced} != {received}")]
    FieldMismatch {
        node: String,
        field: &'static str,
        produced: String,
        received: String,
    },
    #[error("{node} did not receive block {target} in time")]
    VerificationFailed { node: String, target: u64 },
    #[error("producer failed to reach irreversible block {0}")]
    ProductionStalled(u64),
    #[error("ungraceful shutdown requires a clean restart")]
    UngracefulWarmRestart,
}

impl Error {
    /// Whether the error is a transport-level availability condition rather
    /// than a correctness violation. Transient errors are subject to the
    /// caller's retry budget; everything else must stop the scenario.
    ///
    /// An unparseable (typically empty) response body is transient: nodes
    /// answer with nothing while they are still standing up.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::TimedOut
            ),
            Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Error::Hyper(_) => true,
            Error::Json(_) => true,
            _ => false,
        }
    }
}
