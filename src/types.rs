//! Type definitions for the proofport core

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outbound proof request, created by the requester and discarded once the
/// matching response is accepted or the request times out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofRequest {
    pub circuit_id: String,
    pub chain_id: String,

    /// Named public inputs in the order they appear in the request URL.
    pub public_inputs: Vec<(String, String)>,

    /// Caller-generated correlation token, unique per request.
    pub nonce: String,

    /// Request creation time, unix milliseconds.
    pub issued_at: u64,
}

impl ProofRequest {
    pub fn new(
        circuit_id: impl Into<String>,
        chain_id: impl Into<String>,
        public_inputs: Vec<(String, String)>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            circuit_id: circuit_id.into(),
            chain_id: chain_id.into(),
            public_inputs,
            nonce: nonce.into(),
            issued_at: chrono::Utc::now().timestamp_millis() as u64,
        }
    }
}

/// Proof payload pushed back by the external proof surface.
///
/// Field names follow the cross-context wire shape: `circuitId` and
/// `publicInputs` are camelCase, protocol metadata is snake_case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProofPayload {
    /// Hex-encoded opaque proof bytes.
    pub proof: String,

    #[serde(rename = "circuitId")]
    pub circuit_id: String,

    #[serde(rename = "publicInputs")]
    pub public_inputs: HashMap<String, String>,

    /// Chain-specific call data, required only by chain families whose
    /// verifier call convention cannot be derived from `publicInputs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calldata: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<u64>,
}

/// Registry document: circuit id -> entry.
pub type RegistryDocument = HashMap<String, RegistryEntry>;

/// Per-chain verifier deployment location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starknet_address: Option<String>,

    #[serde(default)]
    pub deployed_at: Option<String>,
}

/// One circuit's registry entry. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub circuit_id: String,
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Authoritative ordered public-input names. This ordering determines
    /// positional argument order when calling the on-chain verifier.
    pub public_inputs: Vec<String>,

    /// Compiler/ABI details, opaque to this core.
    #[serde(default)]
    pub metadata: serde_json::Value,

    pub chains: HashMap<String, ChainDeployment>,
}

/// Outcome of one verification call. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// EVM verifier returned a boolean (view call) or a receipt status
    /// (transactional entry point).
    Evm { accepted: bool },

    /// Starknet verifier returned a decoded result (accepted) or an
    /// explicit empty result (rejected). Absence is a negative outcome,
    /// not an error.
    Starknet { result: Option<Vec<String>> },
}

impl VerificationOutcome {
    pub fn accepted(&self) -> bool {
        match self {
            VerificationOutcome::Evm { accepted } => *accepted,
            VerificationOutcome::Starknet { result } => result.is_some(),
        }
    }
}
