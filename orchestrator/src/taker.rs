//! Taker orchestrator: initiates a swap by locking one leg, waits for the
//! LP's counterpart lock, claims it with the preimage, and falls back to a
//! refund once its own lock expires unclaimed.
//!
//! `QuoteToNative` is the fully driven direction: the taker locks the quote
//! chain, discovers the LP's native HTLC via the registry, verifies the
//! witness script against the LP's known refund pubkey before trusting it,
//! and claims or refunds its own native-chain position. `NativeToQuote`
//! claim/refund of the taker's own legs is wired the same way; discovering
//! the LP's quote-chain response for that direction is not implemented (see
//! DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;

use swapcore::chain::evm::EvmChainAdapter;
use swapcore::chain::native::{HtlcWatch, NativeChainAdapter, NativeHtlcHandle};
use swapcore::error::{Error, Result};
use swapcore::htlc;
use swapcore::keys::{ClaimSigner, RefundSigner};
use swapcore::persistence::PersistenceStore;
use swapcore::registry::Registry;
use swapcore::state_machine::{self, Observations, ReorgPolicy};
use swapcore::types::{CanonicalHash, Expiry, HtlcRecord, Swap, SwapDirection, SwapRole, TakerState, TokenId};

const SATS_PER_NATIVE_UNIT: u64 = 100_000_000;
const NATIVE_SCAN_WINDOW: u64 = 2_000;

pub struct TakerOrchestrator {
    pub native: Arc<dyn NativeChainAdapter>,
    pub evm: HashMap<String, Arc<dyn EvmChainAdapter>>,
    pub registry: Arc<dyn Registry>,
    pub store: Arc<dyn PersistenceStore>,
    pub claim_signer: Arc<dyn ClaimSigner>,
    pub refund_signer: Arc<dyn RefundSigner>,
    pub reorg_policy: ReorgPolicy,
    pub lp_native_addr: String,
    pub lp_refund_pubkey: Option<bitcoin::PublicKey>,
}

impl TakerOrchestrator {
    fn evm_adapter(&self, chain: &str) -> Result<&Arc<dyn EvmChainAdapter>> {
        self.evm
            .get(chain)
            .ok_or_else(|| Error::ConfigInvalid(format!("no evm adapter configured for chain {chain}")))
    }

    /// Initiate a `QuoteToNative` swap: lock the quote-chain leg and publish
    /// the hashlock, the taker's native receive address, and the taker's
    /// claim-signing pubkey to the registry so the LP can respond without a
    /// direct message channel.
    #[allow(clippy::too_many_arguments)]
    pub async fn initiate_quote_to_native_swap(
        &self,
        quote_chain: &str,
        quote_token_address: &str,
        quote_amount_smallest_unit: u64,
        quote_amount: rust_decimal::Decimal,
        native_amount: rust_decimal::Decimal,
        lp_quote_addr: &str,
        timelock_seconds: u64,
        native_claim_address: &str,
    ) -> Result<uuid::Uuid> {
        let preimage = htlc::generate_secret();
        let hashlock = htlc::hashlock_for(&preimage);

        self.registry
            .register(&hashlock, native_claim_address, &self.claim_signer.claim_public_key())
            .await?;

        let token: alloy_primitives::Address = quote_token_address
            .parse()
            .map_err(|e| Error::Parse(format!("invalid quote token address: {e}")))?;
        let recipient: alloy_primitives::Address = lp_quote_addr
            .parse()
            .map_err(|e| Error::Parse(format!("invalid LP quote address: {e}")))?;

        let adapter = self.evm_adapter(quote_chain)?;
        let expiry_unix = now_unix() + timelock_seconds;
        let tx_hash = adapter
            .lock(
                &hashlock,
                recipient,
                token,
                alloy_primitives::U256::from(quote_amount_smallest_unit),
                expiry_unix,
            )
            .await?;

        let swap = Swap {
            id: uuid::Uuid::new_v4(),
            role: SwapRole::Taker,
            direction: SwapDirection::QuoteToNative,
            hashlock,
            native_amount,
            quote_amount,
            quote_chain: quote_chain.to_string(),
            quote_token_address: quote_token_address.to_string(),
            lp_native_addr: self.lp_native_addr.clone(),
            lp_quote_addr: lp_quote_addr.to_string(),
            taker_native_addr: native_claim_address.to_string(),
            taker_quote_addr: String::new(),
            preimage: Some(preimage),
            native_htlc: None,
            evm_htlc: Some(HtlcRecord {
                hashlock,
                amount: quote_amount,
                token: TokenId::Native,
                claim_address: lp_quote_addr.to_string(),
                refund_address: String::new(),
                expiry: Expiry::UnixTimestamp(expiry_unix),
                outpoint: Some(format!("{tx_hash:#x}")),
                preimage: None,
                claim_tx: None,
                refund_tx: None,
                confirmations: 0,
                witness_script_hex: None,
            }),
            taker_state: Some(TakerState::Locking),
            lp_state: None,
            created_at: now(),
            updated_at: now(),
        };
        let swap_id = swap.id;
        self.store.put(&swap).await?;
        Ok(swap_id)
    }

    pub async fn run(&self, poll_interval: std::time::Duration) -> Result<()> {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "taker orchestrator cycle failed");
            }
        }
    }

    pub async fn run_once(&self) -> Result<()> {
        self.discover_lp_native_lock().await?;

        let native_height = self.native.current_height().await?;
        let evm_timestamp = now_unix();

        for swap in self.store.list().await? {
            if swap.role != SwapRole::Taker {
                continue;
            }

            let obs = Observations {
                native: swap.native_htlc.clone(),
                evm: swap.evm_htlc.clone(),
                current_native_height: native_height,
                current_evm_timestamp: evm_timestamp,
            };
            let state = state_machine::derive_taker_state(swap.direction, &obs, self.reorg_policy);

            let span = tracing::info_span!("taker_swap", hashlock = %swap.hashlock, state = ?state);
            let _enter = span.enter();

            match state {
                TakerState::Claimable => self.claim(&swap).await?,
                TakerState::Refundable => self.refund(&swap).await?,
                _ => {}
            }

            if Some(state) != swap.taker_state {
                let mut updated = swap.clone();
                updated.taker_state = Some(state);
                updated.updated_at = now();
                self.store.put(&updated).await?;
            }
        }
        Ok(())
    }

    /// For `QuoteToNative` swaps awaiting the LP's native lock: reconstruct
    /// the expected witness script from our own claim pubkey and the LP's
    /// known refund pubkey, check it against what the registry reports, and
    /// only then trust the registry's outpoint enough to go look for it
    /// on-chain.
    async fn discover_lp_native_lock(&self) -> Result<()> {
        let Some(lp_refund_pubkey) = self.lp_refund_pubkey else {
            return Ok(());
        };
        let native_height = self.native.current_height().await?;
        let from = native_height.saturating_sub(NATIVE_SCAN_WINDOW);

        for swap in self.store.list().await? {
            if swap.role != SwapRole::Taker
                || swap.direction != SwapDirection::QuoteToNative
                || swap.native_htlc.is_some()
            {
                continue;
            }

            let Some(hint) = self.registry.lookup(&swap.hashlock).await? else {
                continue;
            };
            let (Some(outpoint), Some(witness_script_hex), Some(expiry_height)) = (
                hint.native_outpoint,
                hint.native_witness_script_hex,
                hint.native_expiry_height,
            ) else {
                continue;
            };

            let expected_script = htlc::build_native_script(
                &swap.hashlock,
                &bitcoin::PublicKey::new(self.claim_signer.claim_public_key()),
                &lp_refund_pubkey,
                expiry_height,
            );
            if hex::encode(expected_script.as_bytes()) != witness_script_hex {
                tracing::error!(hashlock = %swap.hashlock, "registry-reported witness script does not match expected script, refusing to trust it");
                continue;
            }

            let watch = HtlcWatch {
                hashlock: swap.hashlock,
                witness_script: expected_script,
            };
            let Some(lock) = self.native.get_htlc(&watch, from, native_height).await? else {
                continue;
            };
            if lock.outpoint != outpoint {
                tracing::error!(hashlock = %swap.hashlock, "registry outpoint does not match observed on-chain outpoint");
                continue;
            }

            let mut updated = swap.clone();
            updated.native_htlc = Some(HtlcRecord {
                hashlock: swap.hashlock,
                amount: rust_decimal::Decimal::from(lock.amount_sats) / rust_decimal::Decimal::from(SATS_PER_NATIVE_UNIT),
                token: TokenId::Native,
                claim_address: swap.taker_native_addr.clone(),
                refund_address: self.lp_native_addr.clone(),
                expiry: Expiry::BlockHeight(expiry_height as u64),
                outpoint: Some(lock.outpoint),
                preimage: None,
                claim_tx: None,
                refund_tx: None,
                confirmations: lock.confirmations,
                witness_script_hex: Some(witness_script_hex),
            });
            updated.updated_at = now();
            self.store.put(&updated).await?;
        }
        Ok(())
    }

    async fn claim(&self, swap: &Swap) -> Result<()> {
        let Some(preimage) = swap.preimage else {
            tracing::warn!("swap is claimable but this orchestrator does not hold the preimage");
            return Ok(());
        };
        htlc::verify_preimage(&preimage, &swap.hashlock)?;

        match swap.direction {
            SwapDirection::QuoteToNative => {
                let Some(native_htlc) = &swap.native_htlc else {
                    return Ok(());
                };
                let handle = native_handle_from_record(swap.hashlock, native_htlc)?;
                tracing::info!("claiming native-chain HTLC with preimage");
                let txid = self
                    .native
                    .claim_htlc(&handle, &preimage, self.claim_signer.as_ref())
                    .await?;
                tracing::info!(txid = %txid, "native claim broadcast");
                self.record_native_claim(swap, &txid.to_string()).await?;
            }
            SwapDirection::NativeToQuote => {
                tracing::info!("claiming evm-chain HTLC with preimage");
                let adapter = self.evm_adapter(&swap.quote_chain)?;
                let tx_hash = adapter.claim(&swap.hashlock, &preimage).await?;
                tracing::info!(tx_hash = %tx_hash, "evm claim submitted");
            }
        }
        Ok(())
    }

    async fn refund(&self, swap: &Swap) -> Result<()> {
        match swap.direction {
            SwapDirection::QuoteToNative => {
                tracing::info!("refunding evm-chain HTLC after expiry");
                let adapter = self.evm_adapter(&swap.quote_chain)?;
                let tx_hash = adapter.refund(&swap.hashlock).await?;
                tracing::info!(tx_hash = %tx_hash, "evm refund submitted");
            }
            SwapDirection::NativeToQuote => {
                let Some(native_htlc) = &swap.native_htlc else {
                    return Ok(());
                };
                tracing::info!("refunding native-chain HTLC after expiry");
                let handle = native_handle_from_record(swap.hashlock, native_htlc)?;
                let txid = self
                    .native
                    .refund_htlc(&handle, self.refund_signer.as_ref())
                    .await?;
                tracing::info!(txid = %txid, "native refund broadcast");
                self.record_native_refund(swap, &txid.to_string()).await?;
            }
        }
        Ok(())
    }

    async fn record_native_claim(&self, swap: &Swap, txid: &str) -> Result<()> {
        let mut updated = swap.clone();
        if let Some(native) = updated.native_htlc.as_mut() {
            native.claim_tx = Some(txid.to_string());
            native.preimage = swap.preimage;
        }
        updated.updated_at = now();
        self.store.put(&updated).await
    }

    async fn record_native_refund(&self, swap: &Swap, txid: &str) -> Result<()> {
        let mut updated = swap.clone();
        if let Some(native) = updated.native_htlc.as_mut() {
            native.refund_tx = Some(txid.to_string());
        }
        updated.updated_at = now();
        self.store.put(&updated).await
    }
}

fn native_handle_from_record(hashlock: CanonicalHash, record: &HtlcRecord) -> Result<NativeHtlcHandle> {
    let outpoint = record
        .outpoint
        .clone()
        .ok_or_else(|| Error::Parse("native htlc record missing outpoint".to_string()))?;
    let witness_script_hex = record
        .witness_script_hex
        .clone()
        .ok_or_else(|| Error::Parse("native htlc record missing witness script".to_string()))?;
    let Expiry::BlockHeight(expiry_height) = record.expiry else {
        return Err(Error::Parse("native htlc record expiry is not a block height".to_string()));
    };
    NativeHtlcHandle::from_parts(
        hashlock,
        outpoint,
        &witness_script_hex,
        decimal_to_sats(record.amount)?,
        expiry_height as u32,
        record.claim_address.clone(),
        record.refund_address.clone(),
    )
}

fn decimal_to_sats(amount: rust_decimal::Decimal) -> Result<u64> {
    (amount * rust_decimal::Decimal::from(SATS_PER_NATIVE_UNIT))
        .to_u64()
        .ok_or_else(|| Error::Parse(format!("amount {amount} does not fit a sat-denominated u64")))
}

fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

fn now_unix() -> u64 {
    now().unix_timestamp() as u64
}

#[cfg(test)]
mod tests {
    use swapcore::hd_wallet::{HdWallet, SigningRole};
    use swapcore::keys::HdSigner;

    use crate::test_support::{FakeEvmAdapter, FakeNativeAdapter, FakeRegistry, FakeStore};

    use super::*;

    fn orchestrator(
        native: FakeNativeAdapter,
        evm: FakeEvmAdapter,
    ) -> (TakerOrchestrator, Arc<FakeNativeAdapter>, Arc<FakeEvmAdapter>) {
        let wallet = HdWallet::generate(bitcoin::Network::Regtest, 12).unwrap();
        let claim_signer = Arc::new(HdSigner::for_role(&wallet, SigningRole::Claim, 0).unwrap());
        let refund_signer = Arc::new(HdSigner::for_role(&wallet, SigningRole::Refund, 0).unwrap());
        let native = Arc::new(native);
        let evm = Arc::new(evm);
        let mut evm_map: HashMap<String, Arc<dyn EvmChainAdapter>> = HashMap::new();
        evm_map.insert("polygon".to_string(), evm.clone());

        let lp_wallet = HdWallet::generate(bitcoin::Network::Regtest, 12).unwrap();
        let lp_refund_signer = HdSigner::for_role(&lp_wallet, SigningRole::Refund, 0).unwrap();

        let orchestrator = TakerOrchestrator {
            native: native.clone(),
            evm: evm_map,
            registry: Arc::new(FakeRegistry::default()),
            store: Arc::new(FakeStore::default()),
            claim_signer,
            refund_signer,
            reorg_policy: ReorgPolicy::default(),
            lp_native_addr: "bcrt1qlpnativeaddr".to_string(),
            lp_refund_pubkey: Some(bitcoin::PublicKey::new(lp_refund_signer.refund_public_key())),
        };
        (orchestrator, native, evm)
    }

    fn base_swap(hashlock: CanonicalHash, direction: SwapDirection, preimage: Option<[u8; 32]>) -> Swap {
        Swap {
            id: uuid::Uuid::new_v4(),
            role: SwapRole::Taker,
            direction,
            hashlock,
            native_amount: rust_decimal::Decimal::from(1),
            quote_amount: rust_decimal::Decimal::from(1),
            quote_chain: "polygon".to_string(),
            quote_token_address: "0x0000000000000000000000000000000000000003".to_string(),
            lp_native_addr: "bcrt1qlpnativeaddr".to_string(),
            lp_quote_addr: "0x0000000000000000000000000000000000000002".to_string(),
            taker_native_addr: "bcrt1qtakernativeaddr".to_string(),
            taker_quote_addr: String::new(),
            preimage,
            native_htlc: None,
            evm_htlc: None,
            taker_state: None,
            lp_state: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn initiating_a_quote_to_native_swap_locks_the_quote_leg_and_registers_a_hint() {
        let (orchestrator, _native, evm) = orchestrator(FakeNativeAdapter::new(100), FakeEvmAdapter::new(1));

        let swap_id = orchestrator
            .initiate_quote_to_native_swap(
                "polygon",
                "0x0000000000000000000000000000000000000003",
                100_000_000,
                rust_decimal::Decimal::from(1),
                rust_decimal::Decimal::from(1),
                "0x0000000000000000000000000000000000000002",
                3600,
                "bcrt1qtakernativeaddr",
            )
            .await
            .unwrap();

        assert_eq!(*evm.lock_calls.lock().unwrap(), 1);
        let stored = orchestrator.store.get(swap_id).await.unwrap().unwrap();
        assert_eq!(stored.taker_state, Some(TakerState::Locking));
        assert!(stored.preimage.is_some());

        let hint = orchestrator.registry.lookup(&stored.hashlock).await.unwrap();
        assert!(hint.is_some());
    }

    #[tokio::test]
    async fn claiming_a_quote_to_native_swap_claims_the_native_htlc_with_the_preimage() {
        let (orchestrator, native, _evm) = orchestrator(FakeNativeAdapter::new(100), FakeEvmAdapter::new(1));

        let preimage = htlc::generate_secret();
        let hashlock = htlc::hashlock_for(&preimage);
        let mut swap = base_swap(hashlock, SwapDirection::QuoteToNative, Some(preimage));
        swap.native_htlc = Some(HtlcRecord {
            hashlock,
            amount: rust_decimal::Decimal::from(1),
            token: TokenId::Native,
            claim_address: "bcrt1qtakernativeaddr".to_string(),
            refund_address: "bcrt1qlpnativeaddr".to_string(),
            expiry: Expiry::BlockHeight(200),
            outpoint: Some(format!("{}:0", "a".repeat(64))),
            preimage: None,
            claim_tx: None,
            refund_tx: None,
            confirmations: 2,
            witness_script_hex: Some(hex::encode(
                htlc::build_native_script(
                    &hashlock,
                    &bitcoin::PublicKey::new(orchestrator.claim_signer.claim_public_key()),
                    &bitcoin::PublicKey::new(orchestrator.refund_signer.refund_public_key()),
                    200,
                )
                .as_bytes(),
            )),
        });

        orchestrator.claim(&swap).await.unwrap();

        assert_eq!(*native.claim_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn refunding_a_quote_to_native_swap_refunds_the_evm_htlc() {
        let (orchestrator, _native, evm) = orchestrator(FakeNativeAdapter::new(100), FakeEvmAdapter::new(1));

        let hashlock = htlc::hashlock_for(&htlc::generate_secret());
        let swap = base_swap(hashlock, SwapDirection::QuoteToNative, None);

        orchestrator.refund(&swap).await.unwrap();

        assert_eq!(*evm.refund_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn discovers_lp_native_lock_only_after_witness_script_matches_registry_hint() {
        let (orchestrator, native, _evm) = orchestrator(FakeNativeAdapter::new(100), FakeEvmAdapter::new(1));

        let preimage = htlc::generate_secret();
        let hashlock = htlc::hashlock_for(&preimage);
        let swap = base_swap(hashlock, SwapDirection::QuoteToNative, Some(preimage));
        orchestrator.store.put(&swap).await.unwrap();

        orchestrator
            .registry
            .register(&hashlock, "bcrt1qtakernativeaddr", &orchestrator.claim_signer.claim_public_key())
            .await
            .unwrap();

        let expected_script = htlc::build_native_script(
            &hashlock,
            &bitcoin::PublicKey::new(orchestrator.claim_signer.claim_public_key()),
            &orchestrator.lp_refund_pubkey.unwrap(),
            200,
        );
        let outpoint = format!("{}:0", "b".repeat(64));
        orchestrator
            .registry
            .publish_native_htlc(&hashlock, &outpoint, &hex::encode(expected_script.as_bytes()), 200)
            .await
            .unwrap();

        *native.list_htlcs_result.lock().unwrap() = vec![swapcore::chain::native::NativeLock {
            hashlock,
            outpoint: outpoint.clone(),
            amount_sats: 100_000_000,
            height: 100,
            confirmations: 1,
        }];

        orchestrator.discover_lp_native_lock().await.unwrap();

        let stored = orchestrator.store.get(swap.id).await.unwrap().unwrap();
        assert!(stored.native_htlc.is_some());
        assert_eq!(stored.native_htlc.unwrap().outpoint, Some(outpoint));
    }
}
