//! Circuit-specific request openers
//!
//! Thin conveniences over [`ProofChannel`] for the two shipped circuits:
//! allowlist membership (commits to the list with a Merkle root) and an
//! ETH balance threshold.

use alloy_primitives::U256;
use serde_json::json;
use tokio::sync::mpsc;

use crate::channel::{InboundMessage, ProofChannel, ProofHandle};
use crate::error::Result;
use crate::merkle::{self, Keccak2};
use crate::types::ProofRequest;

pub const GROUP_MEMBERSHIP_CIRCUIT: &str = "group-membership";
pub const ETH_BALANCE_CIRCUIT: &str = "eth-balance";

/// Tree depth the group-membership circuit is compiled for (capacity 16).
pub const GROUP_MEMBERSHIP_DEPTH: usize = 4;

/// Open a group-membership proof request: commit to the allowlist with a
/// Merkle root in the URL, and push the full allowlist (which must not go
/// in the URL) as the side payload.
pub fn open_group_membership_request(
    channel: &ProofChannel,
    chain_id: &str,
    allowlist: &[String],
    nonce: &str,
    inbound: mpsc::Receiver<InboundMessage>,
) -> Result<ProofHandle> {
    let leaves: Vec<U256> = allowlist
        .iter()
        .map(|value| merkle::parse_field(value))
        .collect::<Result<_>>()?;
    let root = merkle::compute_root(&Keccak2, &leaves, GROUP_MEMBERSHIP_DEPTH)?;

    let request = ProofRequest::new(
        GROUP_MEMBERSHIP_CIRCUIT,
        chain_id,
        vec![("root".to_string(), merkle::to_field_hex(root))],
        nonce,
    );

    channel.open(&request, json!({ "whitelist": allowlist }), inbound)
}

/// Open an eth-balance proof request for a minimum balance threshold.
pub fn open_eth_balance_request(
    channel: &ProofChannel,
    chain_id: &str,
    threshold: &str,
    nonce: &str,
    inbound: mpsc::Receiver<InboundMessage>,
) -> Result<ProofHandle> {
    let request = ProofRequest::new(
        ETH_BALANCE_CIRCUIT,
        chain_id,
        vec![("threshold".to_string(), threshold.to_string())],
        nonce,
    );

    channel.open(&request, json!({ "threshold": threshold }), inbound)
}
