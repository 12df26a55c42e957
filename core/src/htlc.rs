//! HTLC primitives: secret/hashlock generation, preimage verification,
//! native-chain script construction, and script-sig preimage extraction.

use bitcoin::opcodes::all::*;
use bitcoin::script::{Builder, Instruction, Script, ScriptBuf};
use bitcoin::PublicKey;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::CanonicalHash;

/// Generate a fresh random 32-byte secret (the preimage).
pub fn generate_secret() -> [u8; 32] {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// SHA-256 hashlock for a given preimage.
pub fn hashlock_for(preimage: &[u8; 32]) -> CanonicalHash {
    CanonicalHash::from_bytes(Sha256::digest(preimage).into())
}

/// Verify that `preimage` hashes to `hashlock`.
pub fn verify_preimage(preimage: &[u8; 32], hashlock: &CanonicalHash) -> Result<()> {
    let computed = hashlock_for(preimage);
    if &computed == hashlock {
        Ok(())
    } else {
        Err(Error::PreimageMismatch)
    }
}

/// Build the classical native-chain HTLC witness script:
///
/// ```text
/// OP_IF
///     OP_SHA256 <hashlock> OP_EQUALVERIFY
///     <claim_pubkey> OP_CHECKSIG
/// OP_ELSE
///     <expiry_height> OP_CHECKLOCKTIMEVERIFY OP_DROP
///     <refund_pubkey> OP_CHECKSIG
/// OP_ENDIF
/// ```
pub fn build_native_script(
    hashlock: &CanonicalHash,
    claim_pubkey: &PublicKey,
    refund_pubkey: &PublicKey,
    expiry_height: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_SHA256)
        .push_slice(hashlock.as_bytes())
        .push_opcode(OP_EQUALVERIFY)
        .push_key(claim_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(expiry_height as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(refund_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Extract a candidate preimage push from a claim transaction's script-sig
/// (or witness stack rendered as a script), restricted to the set of
/// currently-open hashlocks.
///
/// This mirrors a two-stage filter: a fast heuristic first (a 32-byte push
/// that is not all-zero and does not look like a compressed public key
/// prefix), then a hash membership check against `open_hashlocks` so a
/// coincidental 32-byte push elsewhere in the script can never be mistaken
/// for a real preimage.
pub fn parse_script_sig(
    script_sig: &Script,
    open_hashlocks: &HashSet<CanonicalHash>,
) -> Option<[u8; 32]> {
    for instruction in script_sig.instructions() {
        let Ok(Instruction::PushBytes(push)) = instruction else {
            continue;
        };
        if let Some(candidate) = preimage_push_candidate(push.as_bytes(), open_hashlocks) {
            return Some(candidate);
        }
    }
    None
}

/// The same push-candidate filter as [`parse_script_sig`], applied to a
/// segwit witness stack instead of a legacy script-sig. Witness items are
/// raw byte pushes with no opcodes to walk, so this scans the stack items
/// directly rather than disassembling a [`Script`].
pub fn extract_preimage_from_witness(
    witness_items: &[Vec<u8>],
    open_hashlocks: &HashSet<CanonicalHash>,
) -> Option<[u8; 32]> {
    for item in witness_items {
        if let Some(candidate) = preimage_push_candidate(item, open_hashlocks) {
            return Some(candidate);
        }
    }
    None
}

fn preimage_push_candidate(
    bytes: &[u8],
    open_hashlocks: &HashSet<CanonicalHash>,
) -> Option<[u8; 32]> {
    if bytes.len() != 32 {
        return None;
    }
    if bytes.iter().all(|b| *b == 0) {
        return None;
    }
    // Compressed pubkeys start with 0x02/0x03; a preimage push that happens
    // to start that way is vanishingly unlikely but the cheap check costs
    // nothing and matches the original heuristic.
    if bytes[0] == 0x02 || bytes[0] == 0x03 {
        return None;
    }

    let candidate: [u8; 32] = bytes.try_into().expect("length checked above");
    let candidate_hash = hashlock_for(&candidate);
    open_hashlocks.contains(&candidate_hash).then_some(candidate)
}
