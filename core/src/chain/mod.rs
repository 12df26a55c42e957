//! Chain adapters: the duck-typed boundary between the settlement core and
//! whatever actually talks to a node.
//!
//! Each chain exposes the same small operation set (lock, claim, refund,
//! observe) behind its own adapter; there is no shared base trait across
//! the native chain and EVM chains because their operations take
//! fundamentally different shapes (UTXO script construction vs. contract
//! calldata). A tagged-variant enum per chain family, rather than a single
//! generic trait object, keeps each adapter's real interface visible at the
//! call site instead of behind an `Any`-like erasure.

pub mod evm;
pub mod native;

use crate::error::{Error, Result};

/// Reject loopback/link-local/metadata-service endpoints for any
/// user-supplied RPC URL, so a malicious or mistyped config value can't
/// make the orchestrator make requests against its own host network.
pub fn validate_endpoint(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| Error::ConfigInvalid(format!("invalid endpoint URL: {e}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::ConfigInvalid(format!(
            "endpoint must be http(s): {url}"
        )));
    }

    let Some(host) = parsed.host_str() else {
        return Err(Error::ConfigInvalid(format!("endpoint has no host: {url}")));
    };

    let blocked = [
        "localhost",
        "127.0.0.1",
        "0.0.0.0",
        "169.254.169.254", // cloud metadata service
        "::1",
    ];
    if blocked.contains(&host) {
        return Err(Error::ConfigInvalid(format!(
            "endpoint host is not allowed: {host}"
        )));
    }

    Ok(())
}
