//! Error types for the settlement core.

use thiserror::Error;

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the settlement core.
///
/// Each variant maps to one of the orchestrator's documented exit codes via
/// [`Error::exit_code`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation (e.g. the timelock-asymmetry invariant).
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A chain adapter could not reach its backing node/RPC.
    #[error("chain unreachable ({chain}): {source}")]
    ChainUnreachable {
        chain: &'static str,
        source: String,
    },

    /// A chain RPC responded with data that does not parse as expected.
    #[error("malformed RPC response from {chain}: {detail}")]
    RpcMalformed { chain: &'static str, detail: String },

    /// A claim preimage did not hash to the swap's hashlock.
    #[error("preimage does not match hashlock")]
    PreimageMismatch,

    /// A swap was initialized (or observed) violating the timelock-asymmetry invariant.
    #[error("timelock policy violated: {0}")]
    TimelockViolated(String),

    /// A chain reorg rolled back an observation that state had already advanced on.
    #[error("reorg rolled back an observation at height {height} on {chain}")]
    ReorgRolledBack { chain: &'static str, height: u64 },

    /// The registry had no entry (or a stale entry) for a hashlock.
    #[error("registry miss for hashlock {0}")]
    RegistryMiss(String),

    /// A chain adapter reported insufficient funds to carry out an action.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Two swaps were registered under the same hashlock.
    #[error("duplicate hashlock: {0}")]
    DuplicateHashlock(String),

    /// Swap not found in storage.
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    /// Persistence operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Parse error (hex, script, address, etc.).
    #[error("parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Native-chain (Bitcoin-style) error.
    #[error("native chain error: {0}")]
    Bitcoin(String),

    /// EVM-chain error.
    #[error("evm chain error: {0}")]
    Evm(String),

    /// Key derivation error.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// Network/HTTP error (registry client, native JSON-RPC).
    #[error("network error: {0}")]
    Network(String),

    /// Generic error with context.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{err:#}"))
    }
}

impl Error {
    /// Exit code an orchestrator binary should return for this error, per the
    /// documented CLI exit-code surface: 0 normal shutdown, 1 misconfiguration
    /// (including a timelock-asymmetry violation), 2 chain connectivity lost
    /// beyond the retry budget, 3 persistence corruption.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigInvalid(_) | Error::TimelockViolated(_) => 1,
            Error::ChainUnreachable { .. } | Error::RpcMalformed { .. } | Error::Network(_) => 2,
            Error::Storage(_) => 3,
            _ => 1,
        }
    }
}
