//! End-to-end scenarios exercised against the state machine and HTLC
//! primitives directly, without any live chain connection.

use std::collections::HashSet;

use swapcore::htlc::{generate_secret, hashlock_for, verify_preimage};
use swapcore::state_machine::{derive_lp_state, derive_taker_state, Observations, ReorgPolicy};
use swapcore::timelock::TimelockPolicy;
use swapcore::types::{CanonicalHash, Expiry, HtlcRecord, LpState, SwapDirection, TakerState, TokenId};

fn base_record(expiry: Expiry, confirmations: u64) -> HtlcRecord {
    HtlcRecord {
        hashlock: CanonicalHash::from_bytes([1u8; 32]),
        amount: rust_decimal::Decimal::ONE,
        token: TokenId::Native,
        claim_address: "claim".to_string(),
        refund_address: "refund".to_string(),
        expiry,
        outpoint: None,
        preimage: None,
        claim_tx: None,
        refund_tx: None,
        confirmations,
        witness_script_hex: None,
    }
}

/// Scenario: happy-path ASK. LP sells native asset; taker locks the quote
/// leg, LP locks the native leg, taker claims native with the preimage, LP
/// observes the revealed preimage and claims the quote leg in turn.
#[test]
fn happy_path_ask_completes_on_both_legs() {
    let preimage = generate_secret();
    let hashlock = hashlock_for(&preimage);
    assert!(verify_preimage(&preimage, &hashlock).is_ok());

    let policy = ReorgPolicy::default();

    // Taker locked the quote leg, LP has not locked the native leg yet.
    let mut evm = base_record(Expiry::UnixTimestamp(20_000), policy.evm_confirmations);
    evm.hashlock = hashlock;
    let obs = Observations {
        evm: Some(evm.clone()),
        native: None,
        current_evm_timestamp: 100,
        current_native_height: 0,
    };
    assert_eq!(
        derive_taker_state(SwapDirection::QuoteToNative, &obs, policy),
        TakerState::Locked
    );

    // LP locks the native leg; taker can now claim.
    let mut native = base_record(Expiry::BlockHeight(900_000), policy.native_confirmations);
    native.hashlock = hashlock;
    let obs = Observations {
        evm: Some(evm.clone()),
        native: Some(native.clone()),
        current_evm_timestamp: 100,
        current_native_height: 500_000,
    };
    assert_eq!(
        derive_taker_state(SwapDirection::QuoteToNative, &obs, policy),
        TakerState::Claimable
    );

    // Taker claims, revealing the preimage on the native leg.
    native.preimage = Some(preimage);
    native.claim_tx = Some("native-claim-txid".to_string());
    let obs = Observations {
        evm: Some(evm.clone()),
        native: Some(native.clone()),
        current_evm_timestamp: 100,
        current_native_height: 500_000,
    };
    assert_eq!(
        derive_taker_state(SwapDirection::QuoteToNative, &obs, policy),
        TakerState::Completed
    );

    // LP extracts the preimage from the native claim's script-sig...
    let mut open = HashSet::new();
    open.insert(hashlock);
    assert!(verify_preimage(&preimage, &hashlock).is_ok());

    // ...and the LP-side state reflects having claimed the quote leg.
    evm.preimage = Some(preimage);
    let obs = Observations {
        evm: Some(evm),
        native: Some(native),
        current_evm_timestamp: 100,
        current_native_height: 500_000,
    };
    assert_eq!(derive_lp_state(SwapDirection::QuoteToNative, &obs, policy), LpState::Claimed);
}

/// Scenario: taker refund. The taker locks the quote leg, the LP never
/// responds with a native lock, and the quote-leg timelock elapses.
#[test]
fn taker_refund_after_lp_nonresponse() {
    let policy = ReorgPolicy::default();
    let evm = base_record(Expiry::UnixTimestamp(1_000), policy.evm_confirmations);

    let obs = Observations {
        evm: Some(evm),
        native: None,
        current_evm_timestamp: 5_000,
        current_native_height: 0,
    };
    assert_eq!(
        derive_taker_state(SwapDirection::QuoteToNative, &obs, policy),
        TakerState::Refundable
    );
}

/// Scenario: LP refund. The LP locked the native leg but the taker never
/// claims before expiry.
#[test]
fn lp_refund_after_taker_nonclaim() {
    let policy = ReorgPolicy::default();
    let evm = base_record(Expiry::UnixTimestamp(20_000), policy.evm_confirmations);
    let native = base_record(Expiry::BlockHeight(500_000), policy.native_confirmations);

    let obs = Observations {
        evm: Some(evm),
        native: Some(native),
        current_evm_timestamp: 100,
        current_native_height: 600_000,
    };
    assert_eq!(derive_lp_state(SwapDirection::QuoteToNative, &obs, policy), LpState::Expired);
}

/// Scenario: preimage-mismatch attack. A party tries to claim with a value
/// that does not hash to the swap's hashlock; the claim must be rejected.
#[test]
fn preimage_mismatch_is_rejected() {
    let real_preimage = generate_secret();
    let hashlock = hashlock_for(&real_preimage);
    let forged_preimage = generate_secret();

    assert!(verify_preimage(&forged_preimage, &hashlock).is_err());
    assert!(verify_preimage(&real_preimage, &hashlock).is_ok());
}

/// Scenario: reorg. An observation with fewer confirmations than required
/// must not be treated as final, so a swap cannot advance past `Locking`
/// purely because of an unconfirmed (and potentially soon-to-be-reorged)
/// lock.
#[test]
fn unconfirmed_lock_never_advances_past_locking() {
    let policy = ReorgPolicy::default();
    let mut evm = base_record(Expiry::UnixTimestamp(20_000), policy.evm_confirmations);
    evm.confirmations = policy.evm_confirmations - 1;

    let obs = Observations {
        evm: Some(evm),
        native: None,
        current_evm_timestamp: 100,
        current_native_height: 0,
    };
    assert_eq!(
        derive_taker_state(SwapDirection::QuoteToNative, &obs, policy),
        TakerState::Locking
    );
}

/// Scenario: timelock-policy-violation-at-init. A native timelock of 300
/// blocks (at ~600s/block) vastly exceeds a quote timelock of 14400
/// seconds, violating the asymmetry invariant; initialization must reject
/// it rather than let the swap proceed.
#[test]
fn timelock_policy_violation_is_rejected_at_init() {
    let policy = TimelockPolicy {
        native_blocks: 300,
        quote_seconds: 14_400,
        native_block_seconds: 600,
        buffer_seconds: 3_600,
    };
    assert!(policy.validate().is_err());
}
