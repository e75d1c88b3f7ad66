//! Concrete JSON-RPC chain clients
//!
//! `HttpEvmClient` issues an `eth_call` against the generated Solidity
//! verifier (`verify(bytes proof, uint256[] publicInputs) -> bool`);
//! `HttpStarknetClient` calls the garaga-generated Cairo verifier
//! (`verify_ultra_keccak_honk_proof(Span<felt252>) -> Option<Span<u256>>`).
//! Both are view-call implementations; transactional submission belongs to
//! whoever holds the signer and plugs in through the same traits.

use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::dispatch::{EvmClient, StarknetClient};
use crate::error::{ProofportError, Result};

const EVM_VERIFY_SIGNATURE: &str = "verify(bytes,uint256[])";
const STARKNET_VERIFY_ENTRY_POINT: &str = "verify_ultra_keccak_honk_proof";

/// ABI-encode the `verify(bytes,uint256[])` call: 4-byte keccak selector,
/// two dynamic-offset head words, then the length-prefixed tails.
pub fn encode_verify_calldata(proof: &[u8], public_inputs: &[U256]) -> Vec<u8> {
    let selector = Keccak256::digest(EVM_VERIFY_SIGNATURE.as_bytes());

    let padded_proof_len = proof.len().div_ceil(32) * 32;
    let proof_offset = 0x40u64;
    let inputs_offset = proof_offset + 32 + padded_proof_len as u64;

    let mut data = selector[..4].to_vec();
    data.extend_from_slice(&U256::from(proof_offset).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(inputs_offset).to_be_bytes::<32>());

    data.extend_from_slice(&U256::from(proof.len()).to_be_bytes::<32>());
    data.extend_from_slice(proof);
    data.resize(data.len() + (padded_proof_len - proof.len()), 0);

    data.extend_from_slice(&U256::from(public_inputs.len()).to_be_bytes::<32>());
    for value in public_inputs {
        data.extend_from_slice(&value.to_be_bytes::<32>());
    }

    data
}

/// Decode the returned bool word. Anything other than a full 32-byte word
/// (an empty return means the call never reached the verifier) is an error,
/// not a negative verdict.
fn decode_bool_word(result_hex: &str) -> Result<bool> {
    let stripped = result_hex.strip_prefix("0x").unwrap_or(result_hex);
    let bytes = hex::decode(stripped)?;
    if bytes.len() != 32 {
        return Err(ProofportError::VerificationFailed(format!(
            "expected a 32-byte verifier return, got {} bytes",
            bytes.len()
        )));
    }
    match bytes[31] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProofportError::VerificationFailed(format!(
            "unparseable verifier return: trailing byte {:#04x}",
            other
        ))),
    }
}

/// Starknet entry-point selector: keccak256 of the name, masked to 250 bits.
fn starknet_selector(entry_point: &str) -> String {
    let mut digest: [u8; 32] = Keccak256::digest(entry_point.as_bytes()).into();
    digest[0] &= 0x03;
    format!("0x{}", hex::encode(digest))
}

/// Decode the Cairo `Option<Span<u256>>` return: variant tag felt first
/// (0 = Some, 1 = None), then the span length and payload felts.
fn decode_option_span(felts: &[String]) -> Result<Option<Vec<String>>> {
    let tag = felts.first().ok_or_else(|| {
        ProofportError::VerificationFailed("empty starknet call result".to_string())
    })?;

    match parse_felt_u64(tag)? {
        1 => Ok(None),
        0 => {
            if felts.len() < 2 {
                return Err(ProofportError::VerificationFailed(
                    "starknet result missing span length".to_string(),
                ));
            }
            // Each u256 span element is two felts (low, high).
            let len = parse_felt_u64(&felts[1])? as usize;
            let payload = &felts[2..];
            if payload.len() != len * 2 {
                return Err(ProofportError::VerificationFailed(format!(
                    "starknet span length {} does not match {} payload felts",
                    len,
                    payload.len()
                )));
            }
            Ok(Some(payload.to_vec()))
        }
        other => Err(ProofportError::VerificationFailed(format!(
            "unexpected option variant tag {}",
            other
        ))),
    }
}

fn parse_felt_u64(felt: &str) -> Result<u64> {
    let stripped = felt.strip_prefix("0x").unwrap_or(felt);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| ProofportError::VerificationFailed(format!("bad felt {}: {}", felt, e)))
}

async fn json_rpc(
    client: &reqwest::Client,
    endpoint: &str,
    method: &str,
    params: Value,
) -> Result<Value> {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response = client.post(endpoint).json(&request).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
        return Err(ProofportError::VerificationFailed(format!(
            "{} returned {}: {}",
            endpoint, status, body
        )));
    }

    let body: Value = response.json().await?;

    if let Some(error) = body.get("error") {
        return Err(ProofportError::VerificationFailed(format!(
            "{} error: {}",
            method, error
        )));
    }

    body.get("result").cloned().ok_or_else(|| {
        ProofportError::VerificationFailed(format!("{} response has no result", method))
    })
}

pub struct HttpEvmClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpEvmClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl EvmClient for HttpEvmClient {
    async fn verify(&self, verifier: &str, proof: &[u8], public_inputs: &[U256]) -> Result<bool> {
        let calldata = encode_verify_calldata(proof, public_inputs);
        debug!(verifier, calldata_len = calldata.len(), "eth_call verify");

        let params = json!([
            { "to": verifier, "data": format!("0x{}", hex::encode(&calldata)) },
            "latest",
        ]);

        let result = json_rpc(&self.client, &self.endpoint, "eth_call", params).await?;
        let result_hex = result.as_str().ok_or_else(|| {
            ProofportError::VerificationFailed("eth_call returned non-string result".to_string())
        })?;

        decode_bool_word(result_hex)
    }
}

pub struct HttpStarknetClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpStarknetClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl StarknetClient for HttpStarknetClient {
    async fn verify(&self, verifier: &str, calldata: &[String]) -> Result<Option<Vec<String>>> {
        debug!(verifier, felts = calldata.len(), "starknet_call verify");

        let params = json!([
            {
                "contract_address": verifier,
                "entry_point_selector": starknet_selector(STARKNET_VERIFY_ENTRY_POINT),
                "calldata": calldata,
            },
            "latest",
        ]);

        let result = json_rpc(&self.client, &self.endpoint, "starknet_call", params).await?;
        let felts: Vec<String> = serde_json::from_value(result)?;

        decode_option_span(&felts)
    }
}
