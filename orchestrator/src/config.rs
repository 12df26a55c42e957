//! Configuration schema and loader.
//!
//! Config is loaded from a TOML file and validated before anything else
//! runs: a bad timelock policy or an unreachable-looking endpoint is
//! rejected here, at startup, with exit code 1 — never discovered midway
//! through a swap.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use swapcore::chain::validate_endpoint;
use swapcore::error::{Error, Result};
use swapcore::timelock::TimelockPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct NativeConfig {
    pub rpc_endpoint: String,
    #[serde(default)]
    pub cli_or_daemon_path: Option<String>,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    /// `mainnet` or `testnet`; mapped to a [`bitcoin::Network`] at startup.
    pub network: String,
}

/// One configured EVM network. The system bridges the native chain with
/// one or more of these, so this is a list entry rather than a singleton.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmNetworkConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub htlc_contract: String,
    pub quote_token: String,
    #[serde(default = "default_evm_confirmations")]
    pub reorg_depth: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelockConfig {
    pub native_blocks: u32,
    pub quote_seconds: u64,
    pub native_block_seconds: u64,
    pub buffer_seconds: u64,
}

impl TimelockConfig {
    pub fn to_policy(&self) -> TimelockPolicy {
        TimelockPolicy {
            native_blocks: self.native_blocks,
            quote_seconds: self.quote_seconds,
            native_block_seconds: self.native_block_seconds,
            buffer_seconds: self.buffer_seconds,
        }
    }
}

fn default_native_confirmations() -> u64 {
    2
}

fn default_evm_confirmations() -> u64 {
    12
}

/// A hashlock an LP already knows about (e.g. recovered after a restart,
/// or seeded manually before the registry has propagated it), loaded from
/// configuration rather than hard-coded.
#[derive(Debug, Clone, Deserialize)]
pub struct KnownHtlc {
    pub hashlock_hex: String,
    pub native_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_dir: String,
    pub native: NativeConfig,
    pub evm_networks: Vec<EvmNetworkConfig>,
    pub registry: RegistryConfig,
    pub timelock: TimelockConfig,

    pub lp_native_addr: String,
    /// EVM network name -> the LP's receive address on that network.
    #[serde(default)]
    pub lp_quote_addr_per_chain: HashMap<String, String>,
    /// Hex-encoded secp256k1 secret key, or unset to derive from the HD
    /// mnemonic supplied on the command line instead.
    #[serde(default)]
    pub lp_claim_signing_key: Option<String>,
    #[serde(default)]
    pub lp_refund_signing_key: Option<String>,
    /// Hex-encoded secp256k1 secret key for the EVM hot wallet that signs
    /// this process's `lock`/`claim`/`refund` transactions. Unset connects
    /// the EVM adapters read-only, which is only useful for inspection —
    /// both the LP and taker roles need this set to submit transactions.
    #[serde(default)]
    pub evm_signing_key: Option<String>,
    /// Hex-encoded compressed public key of the counterparty LP's
    /// refund-signing key. A taker needs this to reconstruct and verify the
    /// expected native HTLC witness script before trusting what the
    /// registry reports for it. Unused when running as an LP.
    #[serde(default)]
    pub lp_refund_pubkey_hex: Option<String>,

    #[serde(default)]
    pub auto_claim_enabled: bool,
    #[serde(default)]
    pub rpc_timeout_seconds: Option<u64>,
    #[serde(default = "default_native_confirmations")]
    pub native_confirmations: u64,
    #[serde(default)]
    pub poll_interval_seconds: Option<u64>,
    #[serde(default)]
    pub known_htlcs: Vec<KnownHtlc>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigInvalid(format!("failed to read config {}: {e}", path.as_ref().display()))
        })?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::ConfigInvalid(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.timelock.to_policy().validate()?;
        validate_endpoint(&self.native.rpc_endpoint)?;
        validate_endpoint(&self.registry.base_url)?;

        if self.evm_networks.is_empty() {
            return Err(Error::ConfigInvalid(
                "at least one entry in evm_networks is required".to_string(),
            ));
        }

        for evm in &self.evm_networks {
            validate_endpoint(&evm.rpc_url)?;
            if evm.htlc_contract.trim().is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "evm_networks[{}].htlc_contract must not be empty",
                    evm.name
                )));
            }
            if evm.quote_token.trim().is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "evm_networks[{}].quote_token must not be empty",
                    evm.name
                )));
            }
        }

        Ok(())
    }

    pub fn evm_network(&self, name: &str) -> Result<&EvmNetworkConfig> {
        self.evm_networks
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::ConfigInvalid(format!("unknown evm network {name}")))
    }

    pub fn lp_quote_addr(&self, chain: &str) -> Result<&str> {
        self.lp_quote_addr_per_chain
            .get(chain)
            .map(String::as_str)
            .ok_or_else(|| Error::ConfigInvalid(format!("no lp_quote_addr_per_chain entry for {chain}")))
    }

    pub fn reorg_policy_for(&self, evm_confirmations: u64) -> swapcore::state_machine::ReorgPolicy {
        swapcore::state_machine::ReorgPolicy {
            native_confirmations: self.native_confirmations,
            evm_confirmations,
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds.unwrap_or(15))
    }

    pub fn rpc_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rpc_timeout_seconds.unwrap_or(30))
    }
}
