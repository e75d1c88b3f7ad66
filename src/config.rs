//! Configuration management for the proofport core

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the external proof-generation surface
    pub proof_surface_url: String,

    /// URL of the circuit registry JSON document
    pub registry_url: String,

    /// Expected origin of inbound proof payloads; unset disables the check
    pub expected_origin: Option<String>,

    /// Fixed interval between side-payload delivery attempts, milliseconds
    pub retry_interval_ms: u64,

    /// Maximum number of delivery attempts before the request expires
    pub max_delivery_attempts: u32,

    /// Maximum accepted age of an inbound payload, milliseconds
    pub max_payload_age_ms: u64,

    /// EVM JSON-RPC endpoint used by the verification dispatcher
    pub evm_rpc_url: String,

    /// Starknet JSON-RPC endpoint used by the verification dispatcher
    pub starknet_rpc_url: String,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proof_surface_url: "http://localhost:3001/proofport".to_string(),
            registry_url: "http://localhost:3001/registry/verifier_registry.json".to_string(),
            expected_origin: None,
            retry_interval_ms: 200,
            max_delivery_attempts: 15,
            max_payload_age_ms: 300_000,
            evm_rpc_url: "http://localhost:8545".to_string(),
            starknet_rpc_url: "http://localhost:5050".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let contents = fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("PROOF_SURFACE_URL") {
            self.proof_surface_url = url;
        }

        if let Ok(url) = env::var("REGISTRY_URL") {
            self.registry_url = url;
        }

        if let Ok(origin) = env::var("EXPECTED_ORIGIN") {
            self.expected_origin = Some(origin);
        }

        if let Ok(interval) = env::var("RETRY_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.retry_interval_ms = ms;
            }
        }

        if let Ok(attempts) = env::var("MAX_DELIVERY_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.max_delivery_attempts = n;
            }
        }

        if let Ok(age) = env::var("MAX_PAYLOAD_AGE_MS") {
            if let Ok(ms) = age.parse() {
                self.max_payload_age_ms = ms;
            }
        }

        if let Ok(url) = env::var("EVM_RPC_URL") {
            self.evm_rpc_url = url;
        }

        if let Ok(url) = env::var("STARKNET_RPC_URL") {
            self.starknet_rpc_url = url;
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.proof_surface_url.is_empty() {
            return Err(anyhow::anyhow!("Proof surface URL is required"));
        }

        if self.registry_url.is_empty() {
            return Err(anyhow::anyhow!("Registry URL is required"));
        }

        if self.max_delivery_attempts == 0 {
            return Err(anyhow::anyhow!("At least one delivery attempt is required"));
        }

        if self.retry_interval_ms == 0 {
            return Err(anyhow::anyhow!("Retry interval must be non-zero"));
        }

        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
