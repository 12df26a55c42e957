//! LP orchestrator: watches configured quote chains for takers locking
//! funds, responds by locking the native-chain leg, and later claims on the
//! quote chain once it observes the preimage revealed by the taker's
//! native-chain claim.
//!
//! Four phases per poll tick:
//! 1. detection        - scan each configured EVM chain for new confirmed locks
//! 2. response         - lock the native leg for each newly-detected swap
//! 3. preimage sweep   - extract a revealed preimage and claim the quote leg
//! 4. expiry sweep     - refund any native locks whose timelock has elapsed
//!
//! Scope: this orchestrator only drives the `QuoteToNative` direction (the
//! LP sells its native-asset inventory). `NativeToQuote` swaps are tracked
//! by [`crate::taker::TakerOrchestrator`] on the taker side, but nothing here
//! yet reacts to a taker's native-chain lock by opening the LP's own
//! quote-chain leg; see DESIGN.md.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;

use swapcore::chain::evm::EvmChainAdapter;
use swapcore::chain::native::{CreateHtlcParams, NativeChainAdapter, NativeHtlcHandle};
use swapcore::error::{Error, Result};
use swapcore::htlc;
use swapcore::keys::{ClaimSigner, RefundSigner};
use swapcore::persistence::PersistenceStore;
use swapcore::registry::Registry;
use swapcore::state_machine::{self, Observations, ReorgPolicy};
use swapcore::timelock::TimelockPolicy;
use swapcore::types::{CanonicalHash, Expiry, HtlcRecord, LpState, Swap, SwapDirection, SwapRole, TokenId};

use crate::config::EvmNetworkConfig;

const SATS_PER_NATIVE_UNIT: u64 = 100_000_000;
/// How many blocks back to look when scanning for a revealed preimage or
/// newly-confirmed lock, bounding a single poll tick's RPC cost.
const NATIVE_SCAN_WINDOW: u64 = 2_000;
const EVM_SCAN_WINDOW: u64 = 10_000;

pub struct LpOrchestrator {
    pub native: Arc<dyn NativeChainAdapter>,
    pub evm: HashMap<String, Arc<dyn EvmChainAdapter>>,
    pub evm_networks: Vec<EvmNetworkConfig>,
    pub registry: Arc<dyn Registry>,
    pub store: Arc<dyn PersistenceStore>,
    pub claim_signer: Arc<dyn ClaimSigner>,
    pub refund_signer: Arc<dyn RefundSigner>,
    pub reorg_policy: ReorgPolicy,
    pub timelock: TimelockPolicy,
    pub lp_native_addr: String,
    pub lp_quote_addr_per_chain: HashMap<String, String>,
    pub last_evm_block: std::sync::Mutex<HashMap<String, u64>>,
    pub last_native_height: AtomicU64,
}

impl LpOrchestrator {
    pub async fn run_once(&self) -> Result<()> {
        self.detect_new_locks().await?;
        self.respond_to_taken_swaps().await?;
        self.claim_quote_legs().await?;
        self.sweep_expired().await?;
        Ok(())
    }

    pub async fn run(&self, poll_interval: std::time::Duration) -> Result<()> {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "lp orchestrator cycle failed");
            }
        }
    }

    fn evm_adapter(&self, chain: &str) -> Result<&Arc<dyn EvmChainAdapter>> {
        self.evm
            .get(chain)
            .ok_or_else(|| Error::ConfigInvalid(format!("no evm adapter configured for chain {chain}")))
    }

    async fn detect_new_locks(&self) -> Result<()> {
        for network in &self.evm_networks {
            let adapter = self.evm_adapter(&network.name)?;
            let current = adapter.current_block().await?;
            let from = {
                let mut last = self.last_evm_block.lock().unwrap();
                let from = last
                    .get(&network.name)
                    .copied()
                    .unwrap_or(current.saturating_sub(EVM_SCAN_WINDOW));
                last.insert(network.name.clone(), current);
                from
            };
            if from >= current {
                continue;
            }

            let locks = adapter.scan_locks_to(from, current).await?;
            for lock in &locks {
                let span = tracing::info_span!("detected_lock", chain = %network.name, hashlock = %lock.hashlock);
                let _enter = span.enter();

                if self.store.find_by_hashlock(&lock.hashlock).await?.is_some() {
                    continue;
                }

                tracing::info!(amount = %lock.amount, "new quote-chain lock detected");

                let amount = rust_decimal::Decimal::from(lock.amount.to::<u64>())
                    / rust_decimal::Decimal::from(10u64.pow(6));

                let swap = Swap {
                    id: uuid::Uuid::new_v4(),
                    role: SwapRole::LiquidityProvider,
                    direction: SwapDirection::QuoteToNative,
                    hashlock: lock.hashlock,
                    native_amount: amount,
                    quote_amount: amount,
                    quote_chain: network.name.clone(),
                    quote_token_address: format!("{:#x}", lock.token),
                    lp_native_addr: self.lp_native_addr.clone(),
                    lp_quote_addr: format!("{:#x}", lock.claim_address),
                    taker_native_addr: String::new(),
                    taker_quote_addr: format!("{:#x}", lock.refund_address),
                    preimage: None,
                    native_htlc: None,
                    evm_htlc: Some(HtlcRecord {
                        hashlock: lock.hashlock,
                        amount,
                        token: TokenId::Native,
                        claim_address: format!("{:#x}", lock.claim_address),
                        refund_address: format!("{:#x}", lock.refund_address),
                        expiry: Expiry::UnixTimestamp(lock.expiry_unix),
                        outpoint: None,
                        preimage: None,
                        claim_tx: None,
                        refund_tx: None,
                        confirmations: self.reorg_policy.evm_confirmations,
                        witness_script_hex: None,
                    }),
                    taker_state: None,
                    lp_state: Some(LpState::Taken),
                    created_at: now(),
                    updated_at: now(),
                };
                self.store.put(&swap).await?;
            }
        }
        Ok(())
    }

    async fn respond_to_taken_swaps(&self) -> Result<()> {
        for swap in self.store.list().await? {
            if swap.direction != SwapDirection::QuoteToNative || swap.native_htlc.is_some() {
                continue;
            }
            let Some(evm_htlc) = &swap.evm_htlc else {
                continue;
            };

            // Check the registry for the taker's native-chain address and
            // claim pubkey. This is advisory only: it never substitutes for
            // validating the observed quote-chain lock itself.
            let hint = self.registry.lookup(&swap.hashlock).await?;
            let Some(hint) = hint else {
                tracing::warn!(hashlock = %swap.hashlock, "no registry hint yet, deferring native lock");
                continue;
            };

            if let Err(reason) = self.validate_taken_swap(&swap, evm_htlc) {
                tracing::warn!(hashlock = %swap.hashlock, %reason, "quote-chain lock failed validation, skipping");
                continue;
            }

            let taker_claim_pubkey = match parse_claim_pubkey(&hint.claim_pubkey_hex) {
                Ok(pk) => pk,
                Err(e) => {
                    tracing::warn!(hashlock = %swap.hashlock, error = %e, "malformed claim pubkey in registry hint");
                    continue;
                }
            };

            let native_height = self.native.current_height().await?;
            let expiry_height = native_expiry_for(native_height, &self.timelock);

            tracing::info!(
                hashlock = %swap.hashlock,
                native_address = %hint.native_address,
                "locking native leg for taken swap"
            );

            let amount_sats = match decimal_to_sats(evm_htlc.amount) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(hashlock = %swap.hashlock, error = %e, "invalid swap amount, skipping");
                    continue;
                }
            };

            let params = CreateHtlcParams {
                hashlock: swap.hashlock,
                amount_sats,
                claim_pubkey: taker_claim_pubkey,
                refund_pubkey: bitcoin::PublicKey::new(self.refund_signer.refund_public_key()),
                expiry_height,
                claim_address: hint.native_address.clone(),
                refund_address: self.lp_native_addr.clone(),
            };

            let handle = match self.native.create_htlc(params).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(hashlock = %swap.hashlock, error = %e, "failed to create native htlc");
                    continue;
                }
            };

            if let Err(e) = self
                .registry
                .publish_native_htlc(&swap.hashlock, &handle.outpoint, &handle.witness_script_hex(), expiry_height)
                .await
            {
                tracing::warn!(hashlock = %swap.hashlock, error = %e, "failed to publish native htlc to registry");
            }

            let mut updated = swap.clone();
            updated.taker_native_addr = hint.native_address.clone();
            updated.native_htlc = Some(HtlcRecord {
                hashlock: swap.hashlock,
                amount: evm_htlc.amount,
                token: TokenId::Native,
                claim_address: hint.native_address,
                refund_address: self.lp_native_addr.clone(),
                expiry: Expiry::BlockHeight(expiry_height as u64),
                outpoint: Some(handle.outpoint),
                preimage: None,
                claim_tx: None,
                refund_tx: None,
                confirmations: 0,
                witness_script_hex: Some(handle.witness_script_hex()),
            });
            updated.lp_state = Some(LpState::Claiming);
            updated.updated_at = now();
            self.store.put(&updated).await?;
        }
        Ok(())
    }

    /// Checks grounded in data the orchestrator actually has: the locked
    /// token is the chain's configured quote token, the LP is the one who
    /// can claim it, the amount is nonzero, and the timelock leaves enough
    /// buffer to safely respond. No order book exists to validate against.
    fn validate_taken_swap(&self, swap: &Swap, evm_htlc: &HtlcRecord) -> std::result::Result<(), String> {
        let lp_quote_addr = self
            .lp_quote_addr_per_chain
            .get(&swap.quote_chain)
            .ok_or_else(|| format!("no configured lp_quote_addr for chain {}", swap.quote_chain))?;

        if !evm_htlc.claim_address.eq_ignore_ascii_case(lp_quote_addr) {
            return Err("claim address does not match this LP's configured quote address".to_string());
        }
        if evm_htlc.amount.is_sign_negative() || evm_htlc.amount.is_zero() {
            return Err("zero or negative amount".to_string());
        }
        let Expiry::UnixTimestamp(expiry) = evm_htlc.expiry else {
            return Err("quote leg expiry is not a unix timestamp".to_string());
        };
        let remaining = expiry.saturating_sub(now().unix_timestamp() as u64);
        if remaining < self.timelock.buffer_seconds {
            return Err("insufficient timelock buffer remaining".to_string());
        }
        Ok(())
    }

    async fn claim_quote_legs(&self) -> Result<()> {
        let native_height = self.native.current_height().await?;
        let from = native_height.saturating_sub(NATIVE_SCAN_WINDOW);

        let open_hashlocks: HashSet<CanonicalHash> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| s.preimage.is_none() && s.native_htlc.is_some())
            .map(|s| s.hashlock)
            .collect();

        for swap in self.store.list().await? {
            if swap.lp_state != Some(LpState::Claiming) {
                continue;
            }
            let Some(native_htlc) = &swap.native_htlc else {
                continue;
            };
            if native_htlc.preimage.is_some() {
                continue;
            }
            let Some(outpoint) = &native_htlc.outpoint else {
                continue;
            };
            let Some(witness_script_hex) = &native_htlc.witness_script_hex else {
                continue;
            };
            let Expiry::BlockHeight(expiry_height) = native_htlc.expiry else {
                continue;
            };

            let handle = NativeHtlcHandle::from_parts(
                swap.hashlock,
                outpoint.clone(),
                witness_script_hex,
                decimal_to_sats(native_htlc.amount).unwrap_or(0),
                expiry_height as u32,
                native_htlc.claim_address.clone(),
                native_htlc.refund_address.clone(),
            )?;

            let preimage = self
                .native
                .extract_preimage(&handle, from, native_height, &open_hashlocks)
                .await?;
            let Some(preimage) = preimage else {
                continue;
            };
            if htlc::verify_preimage(&preimage, &swap.hashlock).is_err() {
                tracing::error!(hashlock = %swap.hashlock, "extracted preimage failed hash verification");
                continue;
            }

            let adapter = self.evm_adapter(&swap.quote_chain)?;
            tracing::info!(hashlock = %swap.hashlock, "claiming quote leg with extracted preimage");
            let tx_hash = adapter.claim(&swap.hashlock, &preimage).await?;

            let mut updated = swap.clone();
            updated.preimage = Some(preimage);
            if let Some(evm_htlc) = updated.evm_htlc.as_mut() {
                evm_htlc.preimage = Some(preimage);
                evm_htlc.claim_tx = Some(format!("{tx_hash:#x}"));
            }
            updated.lp_state = Some(LpState::Claimed);
            updated.updated_at = now();
            self.store.put(&updated).await?;
        }

        self.last_native_height.store(native_height, Ordering::SeqCst);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<()> {
        let native_height = self.native.current_height().await?;
        let evm_timestamp = now().unix_timestamp() as u64;

        for swap in self.store.list().await? {
            if swap.direction != SwapDirection::QuoteToNative {
                continue;
            }
            let Some(native_htlc) = &swap.native_htlc else {
                continue;
            };
            if native_htlc.preimage.is_some() || native_htlc.refund_tx.is_some() {
                continue;
            }

            let obs = Observations {
                native: Some(native_htlc.clone()),
                evm: swap.evm_htlc.clone(),
                current_native_height: native_height,
                current_evm_timestamp: evm_timestamp,
            };
            let lp_state = state_machine::derive_lp_state(swap.direction, &obs, self.reorg_policy);
            if lp_state != LpState::Expired {
                continue;
            }

            let (Some(outpoint), Some(witness_script_hex), Expiry::BlockHeight(expiry_height)) = (
                native_htlc.outpoint.clone(),
                native_htlc.witness_script_hex.clone(),
                native_htlc.expiry,
            ) else {
                tracing::warn!(hashlock = %swap.hashlock, "expired native lock missing data needed to refund");
                continue;
            };

            let handle = match NativeHtlcHandle::from_parts(
                swap.hashlock,
                outpoint,
                &witness_script_hex,
                decimal_to_sats(native_htlc.amount).unwrap_or(0),
                expiry_height as u32,
                native_htlc.claim_address.clone(),
                native_htlc.refund_address.clone(),
            ) {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(hashlock = %swap.hashlock, error = %e, "failed to rebuild handle for refund");
                    continue;
                }
            };

            tracing::info!(hashlock = %swap.hashlock, "sweeping expired native lock via refund");
            let refund_txid = match self.native.refund_htlc(&handle, self.refund_signer.as_ref()).await {
                Ok(txid) => txid,
                Err(e) => {
                    tracing::error!(hashlock = %swap.hashlock, error = %e, "native refund broadcast failed");
                    continue;
                }
            };

            let mut updated = swap.clone();
            if let Some(native) = updated.native_htlc.as_mut() {
                native.refund_tx = Some(refund_txid.to_string());
            }
            updated.lp_state = Some(LpState::Expired);
            updated.updated_at = now();
            self.store.put(&updated).await?;
        }
        Ok(())
    }
}

fn parse_claim_pubkey(hex_str: &str) -> Result<bitcoin::PublicKey> {
    let bytes = hex::decode(hex_str).map_err(|e| Error::Parse(format!("bad claim pubkey hex: {e}")))?;
    let pk = bitcoin::secp256k1::PublicKey::from_slice(&bytes)
        .map_err(|e| Error::Parse(format!("bad claim pubkey: {e}")))?;
    Ok(bitcoin::PublicKey::new(pk))
}

fn decimal_to_sats(amount: rust_decimal::Decimal) -> Result<u64> {
    (amount * rust_decimal::Decimal::from(SATS_PER_NATIVE_UNIT))
        .to_u64()
        .ok_or_else(|| Error::Parse(format!("amount {amount} does not fit a sat-denominated u64")))
}

/// Derive a native-chain expiry block height a safe number of blocks ahead
/// of the current tip, per the configured timelock policy.
fn native_expiry_for(current_height: u64, timelock: &TimelockPolicy) -> u32 {
    (current_height + timelock.native_blocks as u64) as u32
}

fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}
