//! Error types for the proofport core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProofportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Merkle capacity exceeded: {leaves} leaves does not fit depth {depth} (capacity {capacity})")]
    CapacityExceeded {
        leaves: usize,
        depth: usize,
        capacity: usize,
    },

    #[error("Leaf index {index} out of range for {leaves} leaves")]
    LeafIndexOutOfRange { index: usize, leaves: usize },

    #[error("Invalid field value: {0}")]
    InvalidFieldValue(String),

    #[error("Registry fetch failed: {0}")]
    RegistryFetch(String),

    #[error("Unknown circuit: {0}")]
    UnknownCircuit(String),

    #[error("Circuit '{circuit_id}' has no entry for chain '{chain_id}'")]
    UnknownChainForCircuit {
        circuit_id: String,
        chain_id: String,
    },

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("No verifier address for circuit '{circuit_id}' on chain '{chain_id}'")]
    VerifierNotFound {
        circuit_id: String,
        chain_id: String,
    },

    #[error("Missing public input: {0}")]
    MissingPublicInput(String),

    #[error("Missing chain-specific calldata for chain '{0}'")]
    MissingCalldata(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Proof request expired: {0}")]
    Expired(String),

    #[error("Proof request cancelled")]
    Cancelled,

    #[error("Proof surface error: {0}")]
    Surface(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hex encoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, ProofportError>;
