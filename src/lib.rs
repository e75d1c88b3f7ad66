//! proofport: zero-knowledge proof request channel and on-chain
//! verification dispatcher
//!
//! A caller commits to an allowlist with a Merkle root, opens an external
//! proof-generation surface over a cross-context channel, accepts at most
//! one validated proof payload back, and verifies it against the registered
//! on-chain verifier for the circuit and chain.

pub mod channel;
pub mod circuits;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod merkle;
pub mod registry;
pub mod types;

pub use channel::{
    proof_request_url, ChannelConfig, Clock, InboundMessage, ProofChannel, ProofHandle,
    ProofSurface, RejectReason, RequestState, SurfaceOpener, SystemClock,
};
pub use clients::{HttpEvmClient, HttpStarknetClient};
pub use config::Config;
pub use dispatch::{ChainFamily, EvmClient, StarknetClient, VerificationDispatcher};
pub use error::{ProofportError, Result};
pub use merkle::{
    compute_membership_proof, compute_root, FieldHasher, Keccak2, MerkleProof,
};
pub use registry::RegistryClient;
pub use types::{
    ChainDeployment, ProofPayload, ProofRequest, RegistryDocument, RegistryEntry,
    VerificationOutcome,
};
