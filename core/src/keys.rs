//! Hot/cold signing boundary.
//!
//! Claim/refund signing *authority* (who can produce a valid signature) and
//! claim/refund *destination* (where funds land) are kept as separate
//! concerns: a `ClaimSigner`/`RefundSigner` never know a destination
//! address, and destinations are always plain configuration or registry
//! data. This makes it impossible for a compromised signer to redirect
//! funds on its own.

use bitcoin::secp256k1::{ecdsa::Signature, Message, Secp256k1, SecretKey};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::hd_wallet::{HdWallet, SigningRole};

/// Signs claim transactions for a single swap index. Implementors hold the
/// secret key behind [`Zeroizing`] so it is scrubbed from memory on drop.
pub trait ClaimSigner: Send + Sync {
    fn sign_claim(&self, sighash: &[u8; 32]) -> Result<Signature>;
    fn claim_public_key(&self) -> bitcoin::secp256k1::PublicKey;
}

/// Signs refund transactions for a single swap index.
pub trait RefundSigner: Send + Sync {
    fn sign_refund(&self, sighash: &[u8; 32]) -> Result<Signature>;
    fn refund_public_key(&self) -> bitcoin::secp256k1::PublicKey;
}

/// HD-wallet-backed signer for one role at one swap index.
pub struct HdSigner {
    secret_key: Zeroizing<[u8; 32]>,
    public_key: bitcoin::secp256k1::PublicKey,
}

impl HdSigner {
    pub fn for_role(wallet: &HdWallet, role: SigningRole, index: u32) -> Result<Self> {
        let material = match role {
            SigningRole::Claim => wallet.derive_claim_key(index)?,
            SigningRole::Refund => wallet.derive_refund_key(index)?,
        };
        Ok(Self {
            secret_key: Zeroizing::new(material.secret_key.secret_bytes()),
            public_key: material.public_key,
        })
    }

    fn sign(&self, sighash: &[u8; 32]) -> Result<Signature> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&*self.secret_key)
            .map_err(|e| Error::KeyDerivation(format!("invalid secret key bytes: {e}")))?;
        let msg = Message::from_digest(*sighash);
        Ok(secp.sign_ecdsa(&msg, &sk))
    }
}

impl ClaimSigner for HdSigner {
    fn sign_claim(&self, sighash: &[u8; 32]) -> Result<Signature> {
        self.sign(sighash)
    }

    fn claim_public_key(&self) -> bitcoin::secp256k1::PublicKey {
        self.public_key
    }
}

impl RefundSigner for HdSigner {
    fn sign_refund(&self, sighash: &[u8; 32]) -> Result<Signature> {
        self.sign(sighash)
    }

    fn refund_public_key(&self) -> bitcoin::secp256k1::PublicKey {
        self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_refund_signers_for_the_same_index_use_different_keys() {
        let wallet = HdWallet::generate(bitcoin::Network::Regtest, 12).unwrap();
        let claim = HdSigner::for_role(&wallet, SigningRole::Claim, 0).unwrap();
        let refund = HdSigner::for_role(&wallet, SigningRole::Refund, 0).unwrap();
        assert_ne!(claim.claim_public_key(), refund.refund_public_key());
    }

    #[test]
    fn signing_produces_a_verifiable_signature() {
        let wallet = HdWallet::generate(bitcoin::Network::Regtest, 12).unwrap();
        let signer = HdSigner::for_role(&wallet, SigningRole::Claim, 0).unwrap();
        let sighash = [7u8; 32];
        let sig = signer.sign_claim(&sighash).unwrap();

        let secp = Secp256k1::new();
        let msg = Message::from_digest(sighash);
        assert!(secp.verify_ecdsa(&msg, &sig, &signer.claim_public_key()).is_ok());
    }
}
