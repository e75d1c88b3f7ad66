//! proofport command-line interface
//!
//! Thin CLI over the library: compute allowlist commitments, build
//! proof-request URLs, and verify proof payloads against the registered
//! on-chain verifier.

use std::sync::Arc;

use alloy_primitives::U256;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use proofport::channel::proof_request_url;
use proofport::clients::{HttpEvmClient, HttpStarknetClient};
use proofport::config::Config;
use proofport::dispatch::VerificationDispatcher;
use proofport::merkle::{self, Keccak2};
use proofport::registry::RegistryClient;
use proofport::types::{ProofPayload, ProofRequest};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "proofport.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the Merkle root of an allowlist
    Root {
        /// Tree depth (capacity 2^depth)
        #[arg(short, long, default_value_t = 4)]
        depth: usize,

        /// Identity values (hex or decimal)
        values: Vec<String>,
    },

    /// Compute a single membership path
    Path {
        #[arg(short, long, default_value_t = 4)]
        depth: usize,

        /// Leaf index to prove
        #[arg(short, long, default_value_t = 0)]
        index: usize,

        values: Vec<String>,
    },

    /// Build a proof-request URL for the configured proof surface
    RequestUrl {
        #[arg(long)]
        circuit: String,

        #[arg(long)]
        chain: String,

        /// Public inputs as name=value pairs
        #[arg(long = "input")]
        inputs: Vec<String>,

        #[arg(long)]
        nonce: String,
    },

    /// Verify a proof payload against the registered on-chain verifier
    Verify {
        #[arg(long)]
        circuit: String,

        #[arg(long)]
        chain: String,

        /// Hex-encoded proof bytes
        #[arg(long)]
        proof: String,

        /// Public inputs as name=value pairs
        #[arg(long = "input")]
        inputs: Vec<String>,

        /// Chain-specific calldata felts (Starknet verifiers)
        #[arg(long = "calldata")]
        calldata: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&args.config).or_else(|_| Config::from_env())?;

    match args.command {
        Command::Root { depth, values } => {
            let leaves = parse_leaves(&values)?;
            let root = merkle::compute_root(&Keccak2, &leaves, depth)?;
            println!("{}", merkle::to_field_hex(root));
        }

        Command::Path {
            depth,
            index,
            values,
        } => {
            let leaves = parse_leaves(&values)?;
            let proof = merkle::compute_membership_proof(&Keccak2, &leaves, depth, index)?;
            let json = serde_json::json!({
                "root": merkle::to_field_hex(proof.root),
                "leaf": merkle::to_field_hex(proof.leaf),
                "index": proof.index,
                "path": proof.path.iter().copied().map(merkle::to_field_hex).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }

        Command::RequestUrl {
            circuit,
            chain,
            inputs,
            nonce,
        } => {
            let request = ProofRequest::new(circuit, chain, parse_pairs(&inputs)?, nonce);
            let url = proof_request_url(&config.proof_surface_url, &request)?;
            println!("{}", url);
        }

        Command::Verify {
            circuit,
            chain,
            proof,
            inputs,
            calldata,
        } => {
            let registry = Arc::new(RegistryClient::new(
                &config.registry_url,
                config.request_timeout(),
            )?);
            let evm = Arc::new(HttpEvmClient::new(
                &config.evm_rpc_url,
                config.request_timeout(),
            )?);
            let starknet = Arc::new(HttpStarknetClient::new(
                &config.starknet_rpc_url,
                config.request_timeout(),
            )?);
            let dispatcher = VerificationDispatcher::new(registry, evm, starknet);

            let payload = ProofPayload {
                proof,
                circuit_id: circuit,
                public_inputs: parse_pairs(&inputs)?.into_iter().collect(),
                calldata: if calldata.is_empty() {
                    None
                } else {
                    Some(serde_json::json!(calldata))
                },
                nonce: None,
                issued_at: None,
            };

            let outcome = dispatcher.verify(&payload, &chain).await?;
            info!(accepted = outcome.accepted(), "verification finished");
            println!("{}", if outcome.accepted() { "accepted" } else { "rejected" });
        }
    }

    Ok(())
}

fn parse_leaves(values: &[String]) -> Result<Vec<U256>> {
    values
        .iter()
        .map(|v| merkle::parse_field(v).with_context(|| format!("invalid identity value: {}", v)))
        .collect()
}

fn parse_pairs(inputs: &[String]) -> Result<Vec<(String, String)>> {
    inputs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("expected name=value, got: {}", pair))
        })
        .collect()
}
