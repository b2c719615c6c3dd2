//! HTTP control/query client for producer, ship, and rodeos nodes.
//!
//! The minimal chain surface the harness depends on: `get_info` (head and
//! irreversible positions), `get_block` (per-block fetch by number), and the
//! load-generator toggles on the producer. Requests travel over plain TCP via
//! `reqwest` or over a Unix domain socket via a per-request hyper handshake.

use crate::{endpoint::Endpoint, Error};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

/// Attempts per request before a transport-level failure is propagated to
/// the caller (which may keep retrying within its own polling budget).
const REQUEST_ATTEMPTS: usize = 3;

/// Delay between in-client retry attempts.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Cadence of the readiness probe.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Load-generator batching period, in milliseconds.
const GENERATION_PERIOD_MS: u64 = 20;

/// A JSON-over-HTTP client for one node endpoint.
pub struct NodeClient {
    name: String,
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `GET path` (or `POST path` when a body is given) and parses the
    /// response as JSON. Transient transport failures are retried a fixed
    /// number of times before being propagated.
    pub async fn request(&self, path: &str, body: Option<Value>) -> Result<Value, Error> {
        let mut attempt = 0;
        loop {
            match self.request_once(path, body.as_ref()).await {
                Err(e) if e.is_transient() && attempt + 1 < REQUEST_ATTEMPTS => {
                    debug!(node = %self.name, path, attempt, error = %e, "retrying request");
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }

    async fn request_once(&self, path: &str, body: Option<&Value>) -> Result<Value, Error> {
        match &self.endpoint {
            Endpoint::Tcp(_) => {
                let url = self.endpoint.url(path);
                let request = match body {
                    Some(body) => self.http.post(&url).json(body),
                    None => self.http.get(&url),
                };
                let bytes = request
                    .header(ACCEPT, "application/json")
                    .send()
                    .await?
                    .bytes()
                    .await?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            Endpoint::Unix(socket) => {
                let stream = UnixStream::connect(socket).await?;
                let (mut sender, connection) =
                    hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(error = %e, "unix socket connection closed with error");
                    }
                });
                let builder = hyper::Request::builder()
                    .uri(format!("/{path}"))
                    .header(HOST, "localhost")
                    .header(ACCEPT, "application/json");
                let request = match body {
                    Some(body) => builder
                        .method(hyper::Method::POST)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Full::new(Bytes::from(serde_json::to_vec(body)?)))?,
                    None => builder.body(Full::new(Bytes::new()))?,
                };
                let response = sender.send_request(request).await?;
                let bytes = response.into_body().collect().await?.to_bytes();
                Ok(serde_json::from_slice(&bytes)?)
            }
        }
    }

    pub async fn get_info(&self) -> Result<Value, Error> {
        self.request("v1/chain/get_info", None).await
    }

    /// The highest block number the node reports as known to it. The field
    /// must be present in a well-formed response; its absence means the node
    /// is reachable but malformed, which is a hard failure.
    pub async fn head_block_num(&self) -> Result<u64, Error> {
        let info = self.get_info().await?;
        require_u64(&self.name, &info, "head_block_num")
    }

    /// The node's last irreversible block number, used as the
    /// production-completion signal.
    pub async fn last_irreversible_block_num(&self) -> Result<u64, Error> {
        let info = self.get_info().await?;
        require_u64(&self.name, &info, "last_irreversible_block_num")
    }

    /// Fetches a block by number. An object lacking `block_num` means the
    /// block is not yet present on this node, not an error.
    pub async fn get_block(&self, num: u64) -> Result<Value, Error> {
        self.request("v1/chain/get_block", Some(json!({ "block_num_or_id": num })))
            .await
    }

    /// Readiness probe: repeats `get_info` until any well-formed JSON
    /// response arrives or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.get_info().await {
                Ok(_) => return true,
                Err(e) => debug!(node = %self.name, error = %e, "not ready yet"),
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Starts background transaction generation at roughly `tps` transactions
    /// per second. The batch size per period must be even.
    pub async fn start_generation(&self, tps: u64) -> Result<Value, Error> {
        let mut batch = tps * GENERATION_PERIOD_MS / 1000;
        if batch % 2 != 0 {
            batch += 1;
        }
        self.request(
            "v1/txn_test_gen/start_generation",
            Some(json!(["", GENERATION_PERIOD_MS, batch])),
        )
        .await
    }

    pub async fn stop_generation(&self) -> Result<Value, Error> {
        self.request("v1/txn_test_gen/stop_generation", Some(json!([""])))
            .await
    }
}

/// Extracts an integer field from a JSON response, failing hard when absent.
pub(crate) fn require_u64(node: &str, body: &Value, field: &'static str) -> Result<u64, Error> {
    body.get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::MissingField {
            node: node.to_string(),
            field,
            body: body.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_u64_extracts_present_field() {
        let body = json!({ "head_block_num": 42 });
        assert_eq!(require_u64("rodeos0", &body, "head_block_num").unwrap(), 42);
    }

    #[test]
    fn require_u64_rejects_absent_field() {
        let body = json!({ "server_version": "abc" });
        let err = require_u64("rodeos0", &body, "head_block_num").unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "head_block_num", .. }));
        assert!(!err.is_transient());
    }
}
