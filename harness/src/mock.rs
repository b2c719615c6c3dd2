//! In-process mock chain node, used by the `mocknode` binary and the
//! integration tests.
//!
//! Serves just enough of the chain HTTP surface for the harness: `get_info`,
//! `get_block`, and the load-generator toggles. Block content is a
//! deterministic function of the block number, so independent mock nodes
//! agree about history without streaming anything to each other.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

/// How far the irreversible position trails the head.
const LIB_LAG: u64 = 1;

/// Shared state behind one mock node: a head counter plus knobs for shaping
/// responses in tests.
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<Inner>,
}

struct Inner {
    head: AtomicU64,
    first_block: AtomicU64,
    generating: AtomicBool,
    omit_head: AtomicBool,
    uppercase_hashes: AtomicBool,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                head: AtomicU64::new(0),
                first_block: AtomicU64::new(1),
                generating: AtomicBool::new(false),
                omit_head: AtomicBool::new(false),
                uppercase_hashes: AtomicBool::new(false),
            }),
        }
    }

    pub fn head(&self) -> u64 {
        self.inner.head.load(Ordering::SeqCst)
    }

    /// Moves the head forward to `head` if it is ahead of the current
    /// position; the head never goes backwards.
    pub fn set_head(&self, head: u64) {
        self.inner.head.fetch_max(head, Ordering::SeqCst);
    }

    /// Advances the head by one block, returning the new head.
    pub fn advance(&self) -> u64 {
        self.inner.head.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Lowest block this node serves; earlier blocks read as "not present"
    /// (pruned or never-received history).
    pub fn set_first_block(&self, first: u64) {
        self.inner.first_block.store(first, Ordering::SeqCst);
    }

    /// When set, `get_info` answers without a `head_block_num` field
    /// (reachable but malformed).
    pub fn set_omit_head(&self, omit: bool) {
        self.inner.omit_head.store(omit, Ordering::SeqCst);
    }

    /// When set, hash-like block fields are served uppercased, the way some
    /// downstream indexes render them.
    pub fn set_uppercase_hashes(&self, uppercase: bool) {
        self.inner.uppercase_hashes.store(uppercase, Ordering::SeqCst);
    }

    pub fn generating(&self) -> bool {
        self.inner.generating.load(Ordering::SeqCst)
    }

    /// The chain HTTP surface as an axum router; serve it on as many
    /// listeners as the node advertises.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/chain/get_info", get(get_info).post(get_info))
            .route("/v1/chain/get_block", post(get_block))
            .route("/v1/txn_test_gen/start_generation", post(start_generation))
            .route("/v1/txn_test_gen/stop_generation", post(stop_generation))
            .with_state(self.clone())
    }
}

async fn get_info(State(chain): State<MockChain>) -> Json<Value> {
    if chain.inner.omit_head.load(Ordering::SeqCst) {
        return Json(json!({ "server_version": "mocknode" }));
    }
    let head = chain.head();
    Json(json!({
        "server_version": "mocknode",
        "head_block_num": head,
        "head_block_id": block_id(head),
        "last_irreversible_block_num": head.saturating_sub(LIB_LAG),
    }))
}

async fn get_block(State(chain): State<MockChain>, Json(body): Json<Value>) -> Json<Value> {
    let Some(num) = body.get("block_num_or_id").and_then(Value::as_u64) else {
        return Json(json!({}));
    };
    let first = chain.inner.first_block.load(Ordering::SeqCst);
    if num < first || num > chain.head() || num == 0 {
        // Not (yet) present on this node.
        return Json(json!({}));
    }
    let mut block = block_header(num);
    if chain.inner.uppercase_hashes.load(Ordering::SeqCst) {
        for field in ["id", "previous", "transaction_mroot", "action_mroot"] {
            let upper = block[field].as_str().unwrap_or_default().to_ascii_uppercase();
            block[field] = Value::String(upper);
        }
    }
    Json(block)
}

async fn start_generation(State(chain): State<MockChain>, Json(_body): Json<Value>) -> Json<Value> {
    chain.inner.generating.store(true, Ordering::SeqCst);
    Json(json!({ "status": "ok" }))
}

async fn stop_generation(State(chain): State<MockChain>, Json(_body): Json<Value>) -> Json<Value> {
    chain.inner.generating.store(false, Ordering::SeqCst);
    Json(json!({ "status": "ok" }))
}

/// Deterministic 64-hex block id for a height. Height 0 is the null id.
pub fn block_id(num: u64) -> String {
    if num == 0 {
        return "0".repeat(64);
    }
    format!("{:08x}{:056x}", num, num.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// Deterministic block header for a height; every mock node reports the same
/// content for the same height.
pub fn block_header(num: u64) -> Value {
    json!({
        "block_num": num,
        "timestamp": format!(
            "2024-01-01T{:02}:{:02}:{:02}.000",
            num / 3600 % 24,
            num / 60 % 60,
            num % 60
        ),
        "producer": "defproducera",
        "producer_signature": format!("SIG_K1_{:032x}", num.wrapping_mul(0x6a09_e667_f3bc_c909)),
        "ref_block_prefix": num.wrapping_mul(2_654_435_761) & 0xffff_ffff,
        "confirmed": 0,
        "id": block_id(num),
        "previous": block_id(num - 1),
        "transaction_mroot": format!("{:064x}", num.wrapping_mul(0xbb67_ae85_84ca_a73b)),
        "action_mroot": format!("{:064x}", num.wrapping_mul(0x3c6e_f372_fe94_f82b)),
        "schedule_version": 0,
    })
}

/// Serves the chain on an OS-assigned loopback port, returning the bound
/// address.
pub async fn serve_local(chain: &MockChain) -> std::io::Result<SocketAddr> {
    serve_local_at(chain, SocketAddr::from(([127, 0, 0, 1], 0))).await
}

/// Serves the chain on a specific TCP address, returning the bound address.
pub async fn serve_local_at(chain: &MockChain, addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let router = chain.router();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

/// Serves the chain over a Unix domain socket at `path`, replacing any stale
/// socket file left by a previous run.
pub async fn serve_unix(chain: &MockChain, path: &Path) -> std::io::Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = tokio::net::UnixListener::bind(path)?;
    let router = chain.router();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_chain_through_previous_ids() {
        let block = block_header(10);
        assert_eq!(block["block_num"], 10);
        assert_eq!(block["previous"].as_str(), Some(block_id(9).as_str()));
        assert_eq!(block["id"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn head_never_regresses() {
        let chain = MockChain::new();
        chain.set_head(5);
        chain.set_head(3);
        assert_eq!(chain.head(), 5);
        assert_eq!(chain.advance(), 6);
    }
}
