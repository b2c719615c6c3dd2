//! Eventually-consistent verification that a node observed every block.
//!
//! Two phases: bounded polling of the node's reported head position, then a
//! per-block contiguity check over everything the node has on record. The
//! split matters for error semantics: not having caught up yet is an
//! availability condition retried within a budget, while a wrong or missing
//! block after catch-up is a correctness violation that must never be
//! retried.

use crate::{
    client::{require_u64, NodeClient},
    Error,
};
use serde_json::Value;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, info, warn};

/// Fields that must match exactly between the producer's record of a block
/// and a downstream node's copy.
const EXACT_FIELDS: &[&str] = &[
    "block_num",
    "timestamp",
    "producer",
    "producer_signature",
    "ref_block_prefix",
    "confirmed",
    "schedule_version",
];

/// Hash-like identifier fields, compared case-insensitively.
const HASH_FIELDS: &[&str] = &["id", "previous", "transaction_mroot", "action_mroot"];

/// The verification engine. Holds per-node state (the lowest block each node
/// has on record) so repeated invocations within one scenario skip the
/// forward scan.
pub struct Verifier {
    poll_interval: Duration,
    catch_up_budget: u64,
    first_block: HashMap<String, u64>,
}

impl Default for Verifier {
    fn default() -> Self {
        // Nodes may need up to two minutes to catch up under load.
        Self::new(Duration::from_secs(1), 120)
    }
}

impl Verifier {
    /// A verifier polling heads every `poll_interval`, giving up after
    /// `catch_up_budget` polling iterations.
    pub fn new(poll_interval: Duration, catch_up_budget: u64) -> Self {
        Self {
            poll_interval,
            catch_up_budget,
            first_block: HashMap::new(),
        }
    }

    /// Forgets the cached lowest block for `node`, forcing the next
    /// verification to rescan. Call after restarting the node.
    pub fn invalidate(&mut self, node: &str) {
        self.first_block.remove(node);
    }

    /// Proves that the node has received every block up to and including
    /// `target`, contiguously and in order.
    ///
    /// Returns `Ok(false)` when the node failed to reach `target` within the
    /// polling budget; the caller decides whether that fails the scenario.
    /// Malformed responses, missing blocks after catch-up, and block-number
    /// mismatches are hard errors.
    pub async fn all_blocks_received(
        &mut self,
        client: &NodeClient,
        target: u64,
    ) -> Result<bool, Error> {
        info!(node = client.name(), target, "verifying blocks received");
        if !self.wait_for_head(client, target).await? {
            return Ok(false);
        }
        let first = self.first_block(client, target).await?;
        for num in first..=target {
            let block = client.get_block(num).await?;
            let got = require_u64(client.name(), &block, "block_num")?;
            if got != num {
                return Err(Error::BlockMismatch {
                    node: client.name().to_string(),
                    want: num,
                    got,
                });
            }
        }
        info!(
            node = client.name(),
            first, target, "all blocks received in order"
        );
        Ok(true)
    }

    /// Phase 1: polls the reported head until it reaches `target`. The budget
    /// is measured in elapsed polling iterations, not wall-clock drift.
    /// Transport-level failures while polling count against the same budget.
    async fn wait_for_head(&self, client: &NodeClient, target: u64) -> Result<bool, Error> {
        let mut head = 0;
        let mut waited = 0;
        loop {
            match client.head_block_num().await {
                Ok(h) => {
                    head = h;
                    if head >= target {
                        return Ok(true);
                    }
                    debug!(node = client.name(), head, target, "still catching up");
                }
                Err(e) if e.is_transient() => {
                    debug!(node = client.name(), error = %e, "transient failure while polling head");
                }
                Err(e) => return Err(e),
            }
            if waited >= self.catch_up_budget {
                warn!(
                    node = client.name(),
                    target, head, waited, "did not reach target head within budget"
                );
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
            waited += 1;
        }
    }

    /// Phase 2 prologue: the lowest block number the node has on record.
    /// Nodes that pruned or never received early history may start later
    /// than block 1.
    async fn first_block(&mut self, client: &NodeClient, target: u64) -> Result<u64, Error> {
        if let Some(&first) = self.first_block.get(client.name()) {
            return Ok(first);
        }
        for num in 1..=target {
            let block = client.get_block(num).await?;
            if let Some(first) = block.get("block_num").and_then(Value::as_u64) {
                debug!(node = client.name(), first, "first block on record");
                self.first_block.insert(client.name().to_string(), first);
                return Ok(first);
            }
        }
        Err(Error::NoBlocksOnRecord {
            node: client.name().to_string(),
            target,
        })
    }
}

/// Field-for-field equality between the producer's record of a block and a
/// downstream node's copy. Hash-like identifiers compare case-insensitively;
/// any mismatch or absent field is a correctness failure, never retried.
pub fn verify_headers_match(node: &str, produced: &Value, received: &Value) -> Result<(), Error> {
    let get = |body: &Value, owner: &str, field: &'static str| -> Result<Value, Error> {
        body.get(field).cloned().ok_or_else(|| Error::MissingField {
            node: owner.to_string(),
            field,
            body: body.to_string(),
        })
    };
    for &field in EXACT_FIELDS {
        let a = get(produced, "producer", field)?;
        let b = get(received, node, field)?;
        if a != b {
            return Err(Error::FieldMismatch {
                node: node.to_string(),
                field,
                produced: a.to_string(),
                received: b.to_string(),
            });
        }
    }
    for &field in HASH_FIELDS {
        let a = get(produced, "producer", field)?;
        let b = get(received, node, field)?;
        let (Some(a), Some(b)) = (a.as_str(), b.as_str()) else {
            return Err(Error::FieldMismatch {
                node: node.to_string(),
                field,
                produced: a.to_string(),
                received: b.to_string(),
            });
        };
        if !a.eq_ignore_ascii_case(b) {
            return Err(Error::FieldMismatch {
                node: node.to_string(),
                field,
                produced: a.to_string(),
                received: b.to_string(),
            });
        }
    }
    Ok(())
}

/// Cross-checks one block between the producer's own record and a downstream
/// node's copy.
pub async fn verify_against_producer(
    producer: &NodeClient,
    node: &NodeClient,
    block: u64,
) -> Result<(), Error> {
    let produced = producer.get_block(block).await?;
    let received = node.get_block(block).await?;
    verify_headers_match(node.name(), &produced, &received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::block_header;

    #[test]
    fn identical_headers_match() {
        let block = block_header(7);
        verify_headers_match("rodeos0", &block, &block).unwrap();
    }

    #[test]
    fn hash_fields_compare_case_insensitively() {
        let produced = block_header(7);
        let mut received = block_header(7);
        for field in ["id", "previous", "transaction_mroot", "action_mroot"] {
            let upper = received[field].as_str().unwrap().to_ascii_uppercase();
            received[field] = Value::String(upper);
        }
        verify_headers_match("rodeos0", &produced, &received).unwrap();
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let produced = block_header(7);
        let mut received = block_header(7);
        received["producer_signature"] = Value::String("SIG_K1_bogus".into());
        let err = verify_headers_match("rodeos0", &produced, &received).unwrap_err();
        assert!(matches!(
            err,
            Error::FieldMismatch { field: "producer_signature", .. }
        ));
    }

    #[test]
    fn absent_field_is_rejected() {
        let produced = block_header(7);
        let mut received = block_header(7);
        received.as_object_mut().unwrap().remove("previous");
        let err = verify_headers_match("rodeos0", &produced, &received).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "previous", .. }));
    }
}
