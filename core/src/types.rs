//! Shared data types: byte-order-safe hash newtypes, asset metadata, and the
//! persisted swap/HTLC record shapes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{Error, Result};

/// Serde helper: `[u8; 32]` as a lowercase hex string.
mod hex_bytes32 {
    use super::*;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// A 32-byte hash in the byte order the native chain displays to users
/// (reversed relative to its internal/natural representation, following the
/// convention Bitcoin-style chains use for txids and block hashes).
///
/// This type and [`CanonicalHash`] are deliberately not interconvertible via
/// `From`/`Into`: converting between display order and canonical order must
/// always be an explicit, visible call so a misuse shows up in review rather
/// than compiling silently.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeDisplayHash(#[serde(with = "hex_bytes32")] pub [u8; 32]);

/// A 32-byte hash in natural (big-endian, non-reversed) byte order: the form
/// used for the hashlock itself, for EVM calldata, and for internal
/// comparisons.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalHash(#[serde(with = "hex_bytes32")] pub [u8; 32]);

impl NativeDisplayHash {
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = decode_hex32(s)?;
        Ok(Self(bytes_take(&mut bytes)))
    }

    /// Reverse byte order to get the canonical (natural) representation.
    pub fn to_canonical(self) -> CanonicalHash {
        let mut b = self.0;
        b.reverse();
        CanonicalHash(b)
    }
}

impl CanonicalHash {
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = decode_hex32(s)?;
        Ok(Self(bytes_take(&mut bytes)))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Reverse byte order to get the native chain's display representation.
    pub fn to_native_display(self) -> NativeDisplayHash {
        let mut b = self.0;
        b.reverse();
        NativeDisplayHash(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn decode_hex32(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x")).map_err(|e| Error::Parse(format!("bad hash hex: {e}")))
}

fn bytes_take(v: &mut Vec<u8>) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = v.len().min(32);
    out[..n].copy_from_slice(&v[..n]);
    out
}

impl fmt::Debug for NativeDisplayHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeDisplayHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for NativeDisplayHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for CanonicalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonicalHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for CanonicalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A value that must never be logged in full: preimages and raw signing key
/// material. `Debug`/`Display` always print a truncated form, so a `tracing`
/// field built from this type cannot leak the secret by accident.
#[derive(Clone)]
pub struct Masked(pub Vec<u8>);

impl fmt::Debug for Masked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Masked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        if hex.len() <= 12 {
            write!(f, "***")
        } else {
            write!(f, "{}…{}", &hex[..8], &hex[hex.len() - 4..])
        }
    }
}

/// Identifier for the EVM chain a quote-side lock settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvmChain {
    Ethereum,
    Polygon,
    Arbitrum,
    Base,
}

impl EvmChain {
    pub fn chain_id(self) -> u64 {
        match self {
            EvmChain::Ethereum => 1,
            EvmChain::Polygon => 137,
            EvmChain::Arbitrum => 42161,
            EvmChain::Base => 8453,
        }
    }
}

impl fmt::Display for EvmChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvmChain::Ethereum => "ethereum",
            EvmChain::Polygon => "polygon",
            EvmChain::Arbitrum => "arbitrum",
            EvmChain::Base => "base",
        };
        write!(f, "{s}")
    }
}

/// Identifier for a token on either side of a swap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenId {
    /// The native chain's own asset.
    Native,
    /// An ERC-20 token on a specific EVM chain.
    Erc20 { chain: EvmChain, address: String },
}

/// Metadata describing a tradeable asset pair (native asset <-> quote token).
/// Pure data: no order-matching logic lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPair {
    pub base: TokenId,
    pub quote: TokenId,
    /// Smallest unit decimals on the quote side, for amount validation.
    pub quote_decimals: u32,
}

/// Role a party plays in a given swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapRole {
    Taker,
    LiquidityProvider,
}

/// The side of the trade the liquidity provider is filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapDirection {
    /// LP sells the quote asset: the taker locks the native asset first,
    /// and the LP's own leg (observed as `obs.evm`) is the one the taker
    /// is waiting to claim from.
    NativeToQuote,
    /// LP sells the native asset: the taker locks the quote asset first
    /// (observed as `obs.evm`), and claims the LP's native-side lock once
    /// it appears.
    QuoteToNative,
}

/// Taker-observed swap lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TakerState {
    Browse,
    Locking,
    Locked,
    Claimable,
    Completed,
    Refundable,
    Refunded,
}

/// LP-observed swap lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LpState {
    Inventory,
    Taken,
    Claiming,
    Claimed,
    Released,
    Expired,
}

/// An observed on-chain HTLC lock, folded from either chain's adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcRecord {
    pub hashlock: CanonicalHash,
    pub amount: rust_decimal::Decimal,
    pub token: TokenId,
    /// Address that can claim with the correct preimage.
    pub claim_address: String,
    /// Address refunds return to after expiry.
    pub refund_address: String,
    /// Absolute expiry: a block height on the native chain, a unix timestamp on EVM.
    pub expiry: Expiry,
    pub outpoint: Option<String>,
    pub preimage: Option<[u8; 32]>,
    pub claim_tx: Option<String>,
    pub refund_tx: Option<String>,
    pub confirmations: u64,
    /// Native-leg only: the witness script the HTLC output pays to, hex
    /// encoded, so a claim/refund can rebuild the spending witness without
    /// re-deriving it from signer public keys.
    pub witness_script_hex: Option<String>,
}

/// Expiry expressed however the chain that hosts the HTLC measures time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum Expiry {
    BlockHeight(u64),
    UnixTimestamp(u64),
}

/// A single cross-chain swap as tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    pub id: uuid::Uuid,
    pub role: SwapRole,
    pub direction: SwapDirection,
    pub hashlock: CanonicalHash,

    // Immutable terms, fixed at swap creation.
    pub native_amount: rust_decimal::Decimal,
    pub quote_amount: rust_decimal::Decimal,
    /// Name of the configured EVM network this swap's quote leg settles on.
    pub quote_chain: String,
    pub quote_token_address: String,
    pub lp_native_addr: String,
    pub lp_quote_addr: String,
    pub taker_native_addr: String,
    pub taker_quote_addr: String,

    /// Only known to the party that generated the secret.
    pub preimage: Option<[u8; 32]>,
    pub native_htlc: Option<HtlcRecord>,
    pub evm_htlc: Option<HtlcRecord>,
    pub taker_state: Option<TakerState>,
    pub lp_state: Option<LpState>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
}
