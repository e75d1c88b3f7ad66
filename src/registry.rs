//! Circuit registry client
//!
//! Fetches the verifier registry document once per process and serves
//! lookups from the cached copy. A restart is required to observe registry
//! updates.

use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{ProofportError, Result};
use crate::types::{ChainDeployment, RegistryDocument, RegistryEntry};

pub struct RegistryClient {
    url: String,
    client: reqwest::Client,
    /// Populated by the first successful fetch; concurrent first callers
    /// share one in-flight fetch instead of racing duplicates.
    cache: OnceCell<RegistryDocument>,
}

impl RegistryClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
            cache: OnceCell::new(),
        })
    }

    /// Build a client with a pre-populated document. No network access will
    /// ever happen; intended for tests and offline callers.
    pub fn with_document(document: RegistryDocument) -> Self {
        Self {
            url: String::new(),
            client: reqwest::Client::new(),
            cache: OnceCell::new_with(Some(document)),
        }
    }

    /// The cached registry document, fetching it on first access.
    pub async fn document(&self) -> Result<&RegistryDocument> {
        self.cache
            .get_or_try_init(|| self.fetch())
            .await
    }

    async fn fetch(&self) -> Result<RegistryDocument> {
        debug!("Fetching circuit registry from {}", self.url);

        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(ProofportError::RegistryFetch(format!(
                "{} returned {}: {}",
                self.url, status, body
            )));
        }

        let document: RegistryDocument = response.json().await?;
        info!("Loaded registry with {} circuits", document.len());

        Ok(document)
    }

    /// Look up a circuit's registry entry.
    pub async fn entry(&self, circuit_id: &str) -> Result<&RegistryEntry> {
        self.document()
            .await?
            .get(circuit_id)
            .ok_or_else(|| ProofportError::UnknownCircuit(circuit_id.to_string()))
    }

    /// Look up a circuit's deployment on a specific chain.
    pub async fn lookup(
        &self,
        circuit_id: &str,
        chain_id: &str,
    ) -> Result<(&RegistryEntry, &ChainDeployment)> {
        let entry = self.entry(circuit_id).await?;
        let deployment = entry.chains.get(chain_id).ok_or_else(|| {
            ProofportError::UnknownChainForCircuit {
                circuit_id: circuit_id.to_string(),
                chain_id: chain_id.to_string(),
            }
        })?;

        Ok((entry, deployment))
    }

    /// Authoritative positional argument order for a circuit's public inputs.
    pub async fn ordered_public_input_names(&self, circuit_id: &str) -> Result<&[String]> {
        Ok(&self.entry(circuit_id).await?.public_inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_document() -> RegistryDocument {
        let entry = RegistryEntry {
            circuit_id: "group-membership".to_string(),
            version: "1.0.0".to_string(),
            description: "Merkle allowlist membership".to_string(),
            public_inputs: vec!["root".to_string()],
            metadata: serde_json::Value::Null,
            chains: HashMap::from([(
                "11155111".to_string(),
                ChainDeployment {
                    evm_address: Some("0x1111111111111111111111111111111111111111".to_string()),
                    starknet_address: None,
                    deployed_at: Some("2025-01-01".to_string()),
                },
            )]),
        };

        HashMap::from([("group-membership".to_string(), entry)])
    }

    #[tokio::test]
    async fn unknown_circuit_fails_lookup() {
        let registry = RegistryClient::with_document(sample_document());
        let err = registry.lookup("no-such-circuit", "11155111").await.unwrap_err();
        assert!(matches!(err, ProofportError::UnknownCircuit(_)));
    }

    #[tokio::test]
    async fn known_circuit_unknown_chain_fails_lookup() {
        let registry = RegistryClient::with_document(sample_document());
        let err = registry.lookup("group-membership", "999").await.unwrap_err();
        assert!(matches!(err, ProofportError::UnknownChainForCircuit { .. }));
    }

    #[tokio::test]
    async fn lookup_returns_entry_and_deployment() {
        let registry = RegistryClient::with_document(sample_document());
        let (entry, deployment) = registry.lookup("group-membership", "11155111").await.unwrap();
        assert_eq!(entry.public_inputs, vec!["root"]);
        assert!(deployment.evm_address.is_some());

        let names = registry
            .ordered_public_input_names("group-membership")
            .await
            .unwrap();
        assert_eq!(names, ["root".to_string()]);
    }

    #[tokio::test]
    async fn first_successful_fetch_is_cached() {
        let mut server = mockito::Server::new_async().await;

        let body = serde_json::json!({
            "group-membership": {
                "circuit_id": "group-membership",
                "version": "1.0.0",
                "description": "",
                "public_inputs": ["root"],
                "chains": { "anvil": { "evm_address": "0xabc" } }
            }
        });

        let mock = server
            .mock("GET", "/verifier_registry.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/verifier_registry.json", server.url());
        let registry = RegistryClient::new(&url, Duration::from_secs(5)).unwrap();

        let first = registry.document().await.unwrap().len();
        let second = registry.document().await.unwrap().len();
        assert_eq!(first, 1);
        assert_eq!(second, 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_error_is_reported_and_not_cached() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/verifier_registry.json")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let url = format!("{}/verifier_registry.json", server.url());
        let registry = RegistryClient::new(&url, Duration::from_secs(5)).unwrap();

        let err = registry.document().await.unwrap_err();
        assert!(matches!(err, ProofportError::RegistryFetch(_)));
    }
}
