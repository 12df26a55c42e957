//! Off-chain registry client.
//!
//! The registry maps a hashlock to a taker's native-chain address as a
//! *hint*, published so an LP can pre-fund a claim-side script without
//! waiting on a direct message. It is never authoritative: every hint must
//! still be validated against what's actually observed on-chain before the
//! orchestrator acts on it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::CanonicalHash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryHint {
    pub hashlock: CanonicalHash,
    pub native_address: String,
    /// Hex-encoded compressed pubkey the taker will sign a native-chain
    /// claim with; embedded into the HTLC script by whichever party funds
    /// the native leg, so it must be published before that can happen.
    pub claim_pubkey_hex: String,
    /// Populated once the funding party has broadcast the native HTLC: the
    /// output it pays to, so the counterparty can find and spend it without
    /// re-deriving the script from key material alone.
    #[serde(default)]
    pub native_outpoint: Option<String>,
    #[serde(default)]
    pub native_witness_script_hex: Option<String>,
    #[serde(default)]
    pub native_expiry_height: Option<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: time::OffsetDateTime,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    hashlock: &'a CanonicalHash,
    native_address: &'a str,
    claim_pubkey_hex: &'a str,
}

#[derive(Debug, Serialize)]
struct PublishNativeHtlcRequest<'a> {
    hashlock: &'a CanonicalHash,
    native_outpoint: &'a str,
    native_witness_script_hex: &'a str,
    native_expiry_height: u32,
}

#[derive(Debug, Deserialize)]
struct RegistryError {
    error: String,
}

/// Trait boundary so orchestrator logic can be tested against a fake
/// registry without any network I/O.
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    async fn register(
        &self,
        hashlock: &CanonicalHash,
        native_address: &str,
        claim_pubkey: &bitcoin::secp256k1::PublicKey,
    ) -> Result<()>;
    /// Published by whichever party funds the native leg, once the HTLC has
    /// actually broadcast, so the counterparty can find it without
    /// re-deriving the witness script from key material it may not have.
    async fn publish_native_htlc(
        &self,
        hashlock: &CanonicalHash,
        outpoint: &str,
        witness_script_hex: &str,
        expiry_height: u32,
    ) -> Result<()>;
    async fn lookup(&self, hashlock: &CanonicalHash) -> Result<Option<RegistryHint>>;
    async fn health(&self) -> Result<()>;
}

/// `reqwest`-based HTTP client for the registry's `/register`, `/lookup`,
/// and `/status` endpoints.
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Registry for HttpRegistry {
    async fn register(
        &self,
        hashlock: &CanonicalHash,
        native_address: &str,
        claim_pubkey: &bitcoin::secp256k1::PublicKey,
    ) -> Result<()> {
        let url = format!("{}/register", self.base_url);
        let claim_pubkey_hex = hex::encode(claim_pubkey.serialize());
        let body = RegisterRequest {
            hashlock,
            native_address,
            claim_pubkey_hex: &claim_pubkey_hex,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("registry register failed: {e}")))?;

        if !response.status().is_success() {
            let err: RegistryError = response
                .json()
                .await
                .unwrap_or_else(|_| RegistryError {
                    error: "unknown registry error".to_string(),
                });
            return Err(Error::Network(format!("registry rejected hint: {}", err.error)));
        }
        Ok(())
    }

    async fn publish_native_htlc(
        &self,
        hashlock: &CanonicalHash,
        outpoint: &str,
        witness_script_hex: &str,
        expiry_height: u32,
    ) -> Result<()> {
        let url = format!("{}/native_htlc", self.base_url);
        let body = PublishNativeHtlcRequest {
            hashlock,
            native_outpoint: outpoint,
            native_witness_script_hex: witness_script_hex,
            native_expiry_height: expiry_height,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("registry publish_native_htlc failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "registry rejected native HTLC publication: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn lookup(&self, hashlock: &CanonicalHash) -> Result<Option<RegistryHint>> {
        let url = format!("{}/lookup/{}", self.base_url, hashlock);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("registry lookup failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::RegistryMiss(hashlock.to_string()));
        }

        let hint: RegistryHint = response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("malformed registry hint: {e}")))?;
        Ok(Some(hint))
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/status", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("registry health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Network(format!(
                "registry unhealthy: {}",
                response.status()
            )))
        }
    }
}
