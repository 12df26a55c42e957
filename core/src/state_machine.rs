//! Unified swap state machine: folds independent native-chain and
//! quote-chain observations into the Taker/LP state tables.
//!
//! Observations are *confirmation-gated*: a lock or claim is only promoted
//! out of the "observed, not yet final" state once it has accumulated the
//! configured number of confirmations for its chain. Until then, a reorg can
//! roll it back without requiring a state-machine transition to unwind.

use crate::types::{Expiry, HtlcRecord, LpState, SwapDirection, TakerState};

/// Per-chain confirmation depth required before an observation is treated
/// as final.
#[derive(Debug, Clone, Copy)]
pub struct ReorgPolicy {
    pub native_confirmations: u64,
    pub evm_confirmations: u64,
}

impl Default for ReorgPolicy {
    fn default() -> Self {
        Self {
            native_confirmations: 2,
            evm_confirmations: 12,
        }
    }
}

/// Observations folded into a state derivation. `None` means "not observed
/// on-chain yet" for that leg.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub native: Option<HtlcRecord>,
    pub evm: Option<HtlcRecord>,
    pub current_native_height: u64,
    pub current_evm_timestamp: u64,
}

fn is_final(record: &HtlcRecord, required: u64) -> bool {
    record.confirmations >= required
}

fn is_expired(record: &HtlcRecord, native_height: u64, evm_timestamp: u64) -> bool {
    match record.expiry {
        Expiry::BlockHeight(h) => native_height >= h,
        Expiry::UnixTimestamp(t) => evm_timestamp >= t,
    }
}

/// Derive the taker-facing state from the observations available so far.
///
/// Direction determines which leg the taker locks first:
/// - `QuoteToNative`: taker locks quote-side, waits for LP's native lock.
/// - `NativeToQuote`: taker locks native-side, waits for LP's quote lock.
pub fn derive_taker_state(
    direction: SwapDirection,
    obs: &Observations,
    policy: ReorgPolicy,
) -> TakerState {
    let (own_leg, counterparty_leg, own_confirmations) = match direction {
        SwapDirection::QuoteToNative => (&obs.evm, &obs.native, policy.evm_confirmations),
        SwapDirection::NativeToQuote => (&obs.native, &obs.evm, policy.native_confirmations),
    };
    let counterparty_confirmations = match direction {
        SwapDirection::QuoteToNative => policy.native_confirmations,
        SwapDirection::NativeToQuote => policy.evm_confirmations,
    };

    let Some(own) = own_leg else {
        return TakerState::Browse;
    };

    if own.refund_tx.is_some() {
        return TakerState::Refunded;
    }

    if !is_final(own, own_confirmations) {
        return TakerState::Locking;
    }

    match counterparty_leg {
        None => {
            if is_expired(own, obs.current_native_height, obs.current_evm_timestamp) {
                TakerState::Refundable
            } else {
                TakerState::Locked
            }
        }
        Some(counterparty) => {
            if !is_final(counterparty, counterparty_confirmations) {
                return TakerState::Locked;
            }
            if counterparty.claim_tx.is_some() && counterparty.preimage.is_some() {
                return TakerState::Completed;
            }
            if counterparty.preimage.is_none() && is_expired(own, obs.current_native_height, obs.current_evm_timestamp) {
                return TakerState::Refundable;
            }
            TakerState::Claimable
        }
    }
}

/// Derive the LP-facing state from the observations available so far.
pub fn derive_lp_state(direction: SwapDirection, obs: &Observations, policy: ReorgPolicy) -> LpState {
    let (counterparty_leg, own_leg, counterparty_confirmations, own_confirmations) = match direction
    {
        // LP's inventory sits on the leg the LP locks, which is the leg the
        // taker does *not* lock first.
        SwapDirection::QuoteToNative => (&obs.evm, &obs.native, policy.evm_confirmations, policy.native_confirmations),
        SwapDirection::NativeToQuote => (&obs.native, &obs.evm, policy.native_confirmations, policy.evm_confirmations),
    };

    let Some(counterparty) = counterparty_leg else {
        return LpState::Inventory;
    };

    if !is_final(counterparty, counterparty_confirmations) {
        return LpState::Inventory;
    }

    let Some(own) = own_leg else {
        return LpState::Taken;
    };

    if own.refund_tx.is_some() {
        return LpState::Expired;
    }

    if !is_final(own, own_confirmations) {
        return LpState::Claiming;
    }

    if own.preimage.is_some() || counterparty.preimage.is_some() {
        return LpState::Claimed;
    }

    if is_expired(own, obs.current_native_height, obs.current_evm_timestamp) {
        return LpState::Expired;
    }

    LpState::Released
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalHash, TokenId};

    fn record(confirmations: u64, expiry: Expiry) -> HtlcRecord {
        HtlcRecord {
            hashlock: CanonicalHash::from_bytes([0u8; 32]),
            amount: rust_decimal::Decimal::ONE,
            token: TokenId::Native,
            claim_address: "addr".to_string(),
            refund_address: "addr".to_string(),
            expiry,
            outpoint: None,
            preimage: None,
            claim_tx: None,
            refund_tx: None,
            confirmations,
            witness_script_hex: None,
        }
    }

    #[test]
    fn no_observations_is_browse() {
        let obs = Observations::default();
        let state = derive_taker_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, TakerState::Browse);
    }

    #[test]
    fn unconfirmed_own_lock_is_locking() {
        let obs = Observations {
            evm: Some(record(1, Expiry::UnixTimestamp(10_000))),
            ..Default::default()
        };
        let state = derive_taker_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, TakerState::Locking);
    }

    #[test]
    fn confirmed_own_lock_with_no_counterparty_is_locked() {
        let obs = Observations {
            evm: Some(record(12, Expiry::UnixTimestamp(10_000))),
            current_evm_timestamp: 100,
            ..Default::default()
        };
        let state = derive_taker_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, TakerState::Locked);
    }

    #[test]
    fn expired_own_lock_with_no_counterparty_is_refundable() {
        let obs = Observations {
            evm: Some(record(12, Expiry::UnixTimestamp(10_000))),
            current_evm_timestamp: 20_000,
            ..Default::default()
        };
        let state = derive_taker_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, TakerState::Refundable);
    }

    #[test]
    fn counterparty_lock_present_but_unconfirmed_stays_locked() {
        let mut native = record(0, Expiry::BlockHeight(900_000));
        native.confirmations = 0;
        let obs = Observations {
            evm: Some(record(12, Expiry::UnixTimestamp(10_000))),
            native: Some(native),
            current_evm_timestamp: 100,
            ..Default::default()
        };
        let state = derive_taker_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, TakerState::Locked);
    }

    #[test]
    fn confirmed_counterparty_lock_without_preimage_is_claimable() {
        let native = record(2, Expiry::BlockHeight(900_000));
        let obs = Observations {
            evm: Some(record(12, Expiry::UnixTimestamp(10_000))),
            native: Some(native),
            current_evm_timestamp: 100,
            ..Default::default()
        };
        let state = derive_taker_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, TakerState::Claimable);
    }

    #[test]
    fn lp_inventory_until_counterparty_lock_confirmed() {
        let obs = Observations::default();
        let state = derive_lp_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, LpState::Inventory);
    }

    #[test]
    fn lp_taken_once_counterparty_lock_confirmed_and_no_own_lock_yet() {
        let obs = Observations {
            evm: Some(record(12, Expiry::UnixTimestamp(10_000))),
            ..Default::default()
        };
        let state = derive_lp_state(SwapDirection::QuoteToNative, &obs, ReorgPolicy::default());
        assert_eq!(state, LpState::Taken);
    }
}
