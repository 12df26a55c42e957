//! Cross-chain HTLC atomic-swap settlement core.
//!
//! Bridges a native UTXO chain's on-chain HTLC script with an EVM chain's
//! HTLC contract under one shared SHA-256 hashlock, folding independent
//! chain observations into a single swap state machine and enforcing the
//! timelock-asymmetry invariant that keeps either side from getting a free
//! option on the other's funds.

pub mod chain;
pub mod error;
pub mod hd_wallet;
pub mod htlc;
pub mod keys;
pub mod persistence;
pub mod registry;
pub mod state_machine;
pub mod timelock;
pub mod types;

pub use error::{Error, Result};
pub use hd_wallet::HdWallet;
pub use types::{
    AssetPair, CanonicalHash, EvmChain, Expiry, HtlcRecord, LpState, Masked, NativeDisplayHash,
    Swap, SwapDirection, SwapRole, TakerState, TokenId,
};
