//! EVM chain adapter, built on the `alloy` crate family.
//!
//! Wraps a single HTLC contract instance (see the Solidity-shaped interface
//! below) exposing `lock`/`claim`/`refund`/`swaps` and a `Locked` event used
//! for `scan_locks_to`.

use alloy_network::{Ethereum, EthereumWallet};
use alloy_primitives::{Address, FixedBytes, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;

use crate::error::{Error, Result};
use crate::types::CanonicalHash;

use super::validate_endpoint;

sol! {
    #[sol(rpc)]
    interface IHtlc {
        function lock(bytes32 hashlock, address claimAddress, address token, uint256 amount, uint256 expiry) external;
        function claim(bytes32 hashlock, bytes32 preimage) external;
        function refund(bytes32 hashlock) external;
        function swaps(bytes32 hashlock) external view returns (address claimAddress, address refundAddress, address token, uint256 amount, uint256 expiry, bool claimed, bool refunded);

        event Locked(bytes32 indexed hashlock, address indexed refundAddress, address claimAddress, address token, uint256 amount, uint256 expiry);
        event Claimed(bytes32 indexed hashlock, bytes32 preimage);
        event Refunded(bytes32 indexed hashlock);
    }
}

/// A lock observed on the EVM HTLC contract.
#[derive(Debug, Clone)]
pub struct EvmLock {
    pub hashlock: CanonicalHash,
    pub claim_address: Address,
    pub refund_address: Address,
    pub token: Address,
    pub amount: U256,
    pub expiry_unix: u64,
    pub claimed: bool,
    pub refunded: bool,
}

/// Operations the settlement core needs from an EVM chain.
#[async_trait::async_trait]
pub trait EvmChainAdapter: Send + Sync {
    async fn current_block(&self) -> Result<u64>;
    async fn get_swap(&self, hashlock: &CanonicalHash) -> Result<Option<EvmLock>>;
    /// Lock `amount` of `token`, claimable by `recipient` with the preimage
    /// for `hashlock` before `timelock` (unix seconds).
    async fn lock(
        &self,
        hashlock: &CanonicalHash,
        recipient: Address,
        token: Address,
        amount: U256,
        timelock: u64,
    ) -> Result<FixedBytes<32>>;
    async fn claim(&self, hashlock: &CanonicalHash, preimage: &[u8; 32]) -> Result<FixedBytes<32>>;
    async fn refund(&self, hashlock: &CanonicalHash) -> Result<FixedBytes<32>>;
    /// Scan `Locked` events up to `to_block`, returning any new locks.
    async fn scan_locks_to(&self, from_block: u64, to_block: u64) -> Result<Vec<EvmLock>>;
}

/// Live adapter talking to a deployed HTLC contract over JSON-RPC.
pub struct AlloyHtlcAdapter {
    contract_address: Address,
    provider: Box<dyn Provider<Ethereum> + Send + Sync>,
}

impl AlloyHtlcAdapter {
    pub async fn connect(rpc_url: &str, contract_address: Address, signer_key: Option<PrivateKeySigner>) -> Result<Self> {
        validate_endpoint(rpc_url)?;
        let url = rpc_url
            .parse()
            .map_err(|e| Error::ConfigInvalid(format!("invalid EVM RPC URL: {e}")))?;

        let provider: Box<dyn Provider<Ethereum> + Send + Sync> = if let Some(signer) = signer_key {
            let wallet = EthereumWallet::from(signer);
            Box::new(
                ProviderBuilder::new()
                    .wallet(wallet)
                    .connect_http(url),
            )
        } else {
            Box::new(ProviderBuilder::new().connect_http(url))
        };

        Ok(Self {
            contract_address,
            provider,
        })
    }

    fn contract(&self) -> IHtlc::IHtlcInstance<&(dyn Provider<Ethereum> + Send + Sync)> {
        IHtlc::new(self.contract_address, self.provider.as_ref())
    }

    fn to_canonical(hashlock: FixedBytes<32>) -> CanonicalHash {
        CanonicalHash::from_bytes(hashlock.0)
    }

    fn to_fixed(hashlock: &CanonicalHash) -> FixedBytes<32> {
        FixedBytes::from(*hashlock.as_bytes())
    }
}

#[async_trait::async_trait]
impl EvmChainAdapter for AlloyHtlcAdapter {
    async fn current_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| Error::ChainUnreachable {
                chain: "evm",
                source: e.to_string(),
            })
    }

    async fn get_swap(&self, hashlock: &CanonicalHash) -> Result<Option<EvmLock>> {
        let result = self
            .contract()
            .swaps(Self::to_fixed(hashlock))
            .call()
            .await
            .map_err(|e| Error::ChainUnreachable {
                chain: "evm",
                source: e.to_string(),
            })?;

        if result.amount.is_zero() {
            return Ok(None);
        }

        Ok(Some(EvmLock {
            hashlock: *hashlock,
            claim_address: result.claimAddress,
            refund_address: result.refundAddress,
            token: result.token,
            amount: result.amount,
            expiry_unix: result.expiry.to::<u64>(),
            claimed: result.claimed,
            refunded: result.refunded,
        }))
    }

    async fn lock(
        &self,
        hashlock: &CanonicalHash,
        recipient: Address,
        token: Address,
        amount: U256,
        timelock: u64,
    ) -> Result<FixedBytes<32>> {
        let tx = self
            .contract()
            .lock(Self::to_fixed(hashlock), recipient, token, amount, U256::from(timelock))
            .send()
            .await
            .map_err(|e| Error::Evm(format!("lock submission failed: {e}")))?;

        let receipt = tx
            .get_receipt()
            .await
            .map_err(|e| Error::Evm(format!("lock receipt wait failed: {e}")))?;
        Ok(receipt.transaction_hash)
    }

    async fn claim(&self, hashlock: &CanonicalHash, preimage: &[u8; 32]) -> Result<FixedBytes<32>> {
        let tx = self
            .contract()
            .claim(Self::to_fixed(hashlock), FixedBytes::from(*preimage))
            .send()
            .await
            .map_err(|e| Error::Evm(format!("claim submission failed: {e}")))?;

        let receipt = tx
            .get_receipt()
            .await
            .map_err(|e| Error::Evm(format!("claim receipt wait failed: {e}")))?;
        Ok(receipt.transaction_hash)
    }

    async fn refund(&self, hashlock: &CanonicalHash) -> Result<FixedBytes<32>> {
        let tx = self
            .contract()
            .refund(Self::to_fixed(hashlock))
            .send()
            .await
            .map_err(|e| Error::Evm(format!("refund submission failed: {e}")))?;

        let receipt = tx
            .get_receipt()
            .await
            .map_err(|e| Error::Evm(format!("refund receipt wait failed: {e}")))?;
        Ok(receipt.transaction_hash)
    }

    async fn scan_locks_to(&self, from_block: u64, to_block: u64) -> Result<Vec<EvmLock>> {
        let filter = self
            .contract()
            .Locked_filter()
            .from_block(from_block)
            .to_block(to_block);

        let logs = filter
            .query()
            .await
            .map_err(|e| Error::ChainUnreachable {
                chain: "evm",
                source: e.to_string(),
            })?;

        Ok(logs
            .into_iter()
            .map(|(event, _log)| EvmLock {
                hashlock: Self::to_canonical(event.hashlock),
                claim_address: event.claimAddress,
                refund_address: event.refundAddress,
                token: event.token,
                amount: event.amount,
                expiry_unix: event.expiry.to::<u64>(),
                claimed: false,
                refunded: false,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashlock_round_trips_through_fixed_bytes() {
        let hashlock = CanonicalHash::from_bytes([42u8; 32]);
        let fixed = AlloyHtlcAdapter::to_fixed(&hashlock);
        let back = AlloyHtlcAdapter::to_canonical(fixed);
        assert_eq!(hashlock, back);
    }
}
