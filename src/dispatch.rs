//! Registry-driven, chain-polymorphic verification dispatcher
//!
//! Given an accepted proof payload and the circuit/chain identifiers,
//! resolves the verifier location through the registry and invokes the
//! chain family's call convention. Chain submissions are external,
//! non-idempotent side effects: failures are reported, never retried here.

use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ProofportError, Result};
use crate::merkle;
use crate::registry::RegistryClient;
use crate::types::{ProofPayload, VerificationOutcome};

/// Closed set of supported chain families. Adding a family is a new
/// variant with its own call-encoding strategy, not a string-table edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Evm,
    Starknet,
}

const EVM_CHAIN_IDS: &[&str] = &["1", "11155111", "17000", "31337", "anvil"];
const STARKNET_CHAIN_IDS: &[&str] = &[
    "starknet-mainnet",
    "starknet-testnet",
    "starknet-sepolia",
];

impl ChainFamily {
    pub fn classify(chain_id: &str) -> Result<Self> {
        if EVM_CHAIN_IDS.contains(&chain_id) {
            Ok(ChainFamily::Evm)
        } else if STARKNET_CHAIN_IDS.contains(&chain_id) {
            Ok(ChainFamily::Starknet)
        } else {
            Err(ProofportError::UnsupportedChain(chain_id.to_string()))
        }
    }
}

/// EVM verifier invocation: `verify(bytes proof, uint256[] publicInputs)`.
///
/// Implementations may issue a view call and return the contract's boolean,
/// or submit a transaction (with their own signer) and report the receipt
/// status; the dispatcher treats both the same way.
#[async_trait]
pub trait EvmClient: Send + Sync {
    async fn verify(&self, verifier: &str, proof: &[u8], public_inputs: &[U256]) -> Result<bool>;
}

/// Starknet verifier invocation with proof-hint-augmented calldata felts.
///
/// `Ok(None)` is the verifier's explicit empty result (proof rejected), a
/// benign negative outcome. `Err` means the call itself failed (network,
/// revert, timeout) and is a genuine failure. Never conflate the two.
#[async_trait]
pub trait StarknetClient: Send + Sync {
    async fn verify(&self, verifier: &str, calldata: &[String]) -> Result<Option<Vec<String>>>;
}

pub struct VerificationDispatcher {
    registry: Arc<RegistryClient>,
    evm: Arc<dyn EvmClient>,
    starknet: Arc<dyn StarknetClient>,
}

impl VerificationDispatcher {
    pub fn new(
        registry: Arc<RegistryClient>,
        evm: Arc<dyn EvmClient>,
        starknet: Arc<dyn StarknetClient>,
    ) -> Self {
        Self {
            registry,
            evm,
            starknet,
        }
    }

    /// Verify an accepted proof payload against the on-chain verifier for
    /// its circuit on `chain_id`.
    pub async fn verify(&self, payload: &ProofPayload, chain_id: &str) -> Result<VerificationOutcome> {
        let family = ChainFamily::classify(chain_id)?;
        debug!(circuit_id = %payload.circuit_id, chain_id, ?family, "dispatching verification");

        let outcome = match family {
            ChainFamily::Evm => self.verify_evm(payload, chain_id).await?,
            ChainFamily::Starknet => self.verify_starknet(payload, chain_id).await?,
        };

        info!(
            circuit_id = %payload.circuit_id,
            chain_id,
            accepted = outcome.accepted(),
            "verification complete"
        );

        Ok(outcome)
    }

    async fn verify_evm(&self, payload: &ProofPayload, chain_id: &str) -> Result<VerificationOutcome> {
        let (entry, deployment) = self.registry.lookup(&payload.circuit_id, chain_id).await?;

        let verifier = deployment
            .evm_address
            .as_deref()
            .ok_or_else(|| ProofportError::VerifierNotFound {
                circuit_id: payload.circuit_id.clone(),
                chain_id: chain_id.to_string(),
            })?;

        // Positional arguments strictly in the registry's authoritative order.
        let mut public_inputs = Vec::with_capacity(entry.public_inputs.len());
        for name in &entry.public_inputs {
            let value = payload
                .public_inputs
                .get(name)
                .ok_or_else(|| ProofportError::MissingPublicInput(name.clone()))?;
            public_inputs.push(merkle::parse_field(value)?);
        }

        let proof_hex = payload.proof.strip_prefix("0x").unwrap_or(&payload.proof);
        let proof = hex::decode(proof_hex)?;

        let accepted = self
            .evm
            .verify(verifier, &proof, &public_inputs)
            .await
            .map_err(into_verification_failure)?;

        Ok(VerificationOutcome::Evm { accepted })
    }

    async fn verify_starknet(
        &self,
        payload: &ProofPayload,
        chain_id: &str,
    ) -> Result<VerificationOutcome> {
        let (_entry, deployment) = self.registry.lookup(&payload.circuit_id, chain_id).await?;

        let verifier = deployment
            .starknet_address
            .as_deref()
            .ok_or_else(|| ProofportError::VerifierNotFound {
                circuit_id: payload.circuit_id.clone(),
                chain_id: chain_id.to_string(),
            })?;

        // This chain family's verifier expects calldata produced at
        // proof-generation time; it cannot be rebuilt from publicInputs.
        let calldata = extract_calldata(payload.calldata.as_ref())
            .ok_or_else(|| ProofportError::MissingCalldata(chain_id.to_string()))?;

        let result = self
            .starknet
            .verify(verifier, &calldata)
            .await
            .map_err(into_verification_failure)?;

        Ok(VerificationOutcome::Starknet { result })
    }
}

fn extract_calldata(calldata: Option<&Value>) -> Option<Vec<String>> {
    let items = calldata?.as_array()?;

    let mut felts = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => felts.push(s.clone()),
            Value::Number(n) => felts.push(n.to_string()),
            _ => return None,
        }
    }

    Some(felts)
}

/// Remote-chain faults (network error, revert, timeout) surface as
/// `VerificationFailed`; retry policy is the caller's.
fn into_verification_failure(err: ProofportError) -> ProofportError {
    match err {
        e @ ProofportError::VerificationFailed(_) => e,
        other => ProofportError::VerificationFailed(other.to_string()),
    }
}
