//! Fake chain/registry/store implementations shared by `lp`'s and
//! `taker`'s orchestrator-level tests. Never compiled outside `cfg(test)`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use alloy_primitives::{Address, FixedBytes, U256};

use swapcore::chain::evm::{EvmChainAdapter, EvmLock};
use swapcore::chain::native::{CreateHtlcParams, HtlcWatch, NativeChainAdapter, NativeHtlcHandle, NativeLock};
use swapcore::error::Result;
use swapcore::keys::{ClaimSigner, RefundSigner};
use swapcore::persistence::{PersistenceStore, StoreFuture};
use swapcore::registry::{Registry, RegistryHint};
use swapcore::types::{CanonicalHash, NativeDisplayHash, Swap};

/// Everything about a `create_htlc` call worth asserting on, since
/// `CreateHtlcParams` itself has no `Clone` impl.
pub struct RecordedCreateCall {
    pub hashlock: CanonicalHash,
    pub amount_sats: u64,
    pub claim_pubkey: bitcoin::PublicKey,
    pub refund_pubkey: bitcoin::PublicKey,
    pub claim_address: String,
    pub refund_address: String,
}

#[derive(Default)]
pub struct FakeNativeAdapter {
    pub height: AtomicU64,
    pub create_calls: Mutex<Vec<RecordedCreateCall>>,
    pub claim_calls: Mutex<u32>,
    pub refund_calls: Mutex<u32>,
    pub extract_preimage_result: Mutex<Option<[u8; 32]>>,
    pub list_htlcs_result: Mutex<Vec<NativeLock>>,
    pub create_handle_outpoint: Mutex<String>,
}

impl FakeNativeAdapter {
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
            create_handle_outpoint: Mutex::new(format!("{}:0", "a".repeat(64))),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl NativeChainAdapter for FakeNativeAdapter {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn create_htlc(&self, params: CreateHtlcParams) -> Result<NativeHtlcHandle> {
        let outpoint = self.create_handle_outpoint.lock().unwrap().clone();
        let witness_script =
            swapcore::htlc::build_native_script(&params.hashlock, &params.claim_pubkey, &params.refund_pubkey, params.expiry_height);
        self.create_calls.lock().unwrap().push(RecordedCreateCall {
            hashlock: params.hashlock,
            amount_sats: params.amount_sats,
            claim_pubkey: params.claim_pubkey,
            refund_pubkey: params.refund_pubkey,
            claim_address: params.claim_address.clone(),
            refund_address: params.refund_address.clone(),
        });
        Ok(NativeHtlcHandle::from_parts(
            params.hashlock,
            outpoint,
            &hex::encode(witness_script.as_bytes()),
            params.amount_sats,
            params.expiry_height,
            params.claim_address,
            params.refund_address,
        )?)
    }

    async fn claim_htlc(
        &self,
        _handle: &NativeHtlcHandle,
        _preimage: &[u8; 32],
        _claim_signer: &dyn ClaimSigner,
    ) -> Result<NativeDisplayHash> {
        *self.claim_calls.lock().unwrap() += 1;
        NativeDisplayHash::from_hex(&"b".repeat(64))
    }

    async fn refund_htlc(
        &self,
        _handle: &NativeHtlcHandle,
        _refund_signer: &dyn RefundSigner,
    ) -> Result<NativeDisplayHash> {
        *self.refund_calls.lock().unwrap() += 1;
        NativeDisplayHash::from_hex(&"c".repeat(64))
    }

    async fn list_htlcs(&self, _watches: &[HtlcWatch], _from_height: u64, _to_height: u64) -> Result<Vec<NativeLock>> {
        Ok(self.list_htlcs_result.lock().unwrap().clone())
    }

    async fn extract_preimage(
        &self,
        _handle: &NativeHtlcHandle,
        _from_height: u64,
        _to_height: u64,
        _open_hashlocks: &HashSet<CanonicalHash>,
    ) -> Result<Option<[u8; 32]>> {
        Ok(*self.extract_preimage_result.lock().unwrap())
    }
}

#[derive(Default)]
pub struct FakeEvmAdapter {
    pub block: AtomicU64,
    pub lock_calls: Mutex<u32>,
    pub claim_calls: Mutex<u32>,
    pub refund_calls: Mutex<u32>,
    pub scan_result: Mutex<Vec<EvmLock>>,
}

impl FakeEvmAdapter {
    pub fn new(block: u64) -> Self {
        Self {
            block: AtomicU64::new(block),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl EvmChainAdapter for FakeEvmAdapter {
    async fn current_block(&self) -> Result<u64> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn get_swap(&self, _hashlock: &CanonicalHash) -> Result<Option<EvmLock>> {
        Ok(None)
    }

    async fn lock(&self, _hashlock: &CanonicalHash, _recipient: Address, _token: Address, _amount: U256, _timelock: u64) -> Result<FixedBytes<32>> {
        *self.lock_calls.lock().unwrap() += 1;
        Ok(FixedBytes::from([1u8; 32]))
    }

    async fn claim(&self, _hashlock: &CanonicalHash, _preimage: &[u8; 32]) -> Result<FixedBytes<32>> {
        *self.claim_calls.lock().unwrap() += 1;
        Ok(FixedBytes::from([2u8; 32]))
    }

    async fn refund(&self, _hashlock: &CanonicalHash) -> Result<FixedBytes<32>> {
        *self.refund_calls.lock().unwrap() += 1;
        Ok(FixedBytes::from([3u8; 32]))
    }

    async fn scan_locks_to(&self, _from_block: u64, _to_block: u64) -> Result<Vec<EvmLock>> {
        Ok(self.scan_result.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    pub hints: Mutex<HashMap<CanonicalHash, RegistryHint>>,
}

#[async_trait::async_trait]
impl Registry for FakeRegistry {
    async fn register(&self, hashlock: &CanonicalHash, native_address: &str, claim_pubkey: &bitcoin::secp256k1::PublicKey) -> Result<()> {
        self.hints.lock().unwrap().insert(
            *hashlock,
            RegistryHint {
                hashlock: *hashlock,
                native_address: native_address.to_string(),
                claim_pubkey_hex: hex::encode(claim_pubkey.serialize()),
                native_outpoint: None,
                native_witness_script_hex: None,
                native_expiry_height: None,
                published_at: time::OffsetDateTime::UNIX_EPOCH,
            },
        );
        Ok(())
    }

    async fn publish_native_htlc(&self, hashlock: &CanonicalHash, outpoint: &str, witness_script_hex: &str, expiry_height: u32) -> Result<()> {
        let mut hints = self.hints.lock().unwrap();
        let hint = hints
            .get_mut(hashlock)
            .ok_or_else(|| swapcore::error::Error::RegistryMiss(hashlock.to_string()))?;
        hint.native_outpoint = Some(outpoint.to_string());
        hint.native_witness_script_hex = Some(witness_script_hex.to_string());
        hint.native_expiry_height = Some(expiry_height);
        Ok(())
    }

    async fn lookup(&self, hashlock: &CanonicalHash) -> Result<Option<RegistryHint>> {
        Ok(self.hints.lock().unwrap().get(hashlock).cloned())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub swaps: Mutex<HashMap<uuid::Uuid, Swap>>,
}

impl PersistenceStore for FakeStore {
    fn get(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, Option<Swap>> {
        Box::pin(async move { Ok(self.swaps.lock().unwrap().get(&swap_id).cloned()) })
    }

    fn put(&self, swap: &Swap) -> StoreFuture<'_, ()> {
        let swap = swap.clone();
        Box::pin(async move {
            self.swaps.lock().unwrap().insert(swap.id, swap);
            Ok(())
        })
    }

    fn delete(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.swaps.lock().unwrap().remove(&swap_id);
            Ok(())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Swap>> {
        Box::pin(async move { Ok(self.swaps.lock().unwrap().values().cloned().collect()) })
    }

    fn find_by_hashlock(&self, hashlock: &CanonicalHash) -> StoreFuture<'_, Option<Swap>> {
        let hashlock = *hashlock;
        Box::pin(async move { Ok(self.swaps.lock().unwrap().values().find(|s| s.hashlock == hashlock).cloned()) })
    }
}
