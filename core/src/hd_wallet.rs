//! Hierarchical Deterministic (HD) key derivation for swap signing roles.
//!
//! A single mnemonic derives independent keys per role (claim-signing,
//! refund-signing) and per swap index, so that compromising one role's key
//! at one index never exposes another role's key.

use anyhow::Context;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::str::FromStr;

use crate::error::{Error, Result};

/// BIP-85-style application prefix, reused as a domain separator for the
/// derivation tree below (distinct from any registered BIP-85 application).
const APP_PREFIX: u32 = 83696968;
/// Per-role purpose constants under the application prefix.
const ROLE_CLAIM_SIGNING: u32 = 1;
const ROLE_REFUND_SIGNING: u32 = 2;

/// Signing role a derived key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningRole {
    Claim,
    Refund,
}

impl SigningRole {
    fn purpose(self) -> u32 {
        match self {
            SigningRole::Claim => ROLE_CLAIM_SIGNING,
            SigningRole::Refund => ROLE_REFUND_SIGNING,
        }
    }
}

/// A derived (secret key, public key) pair for one signing role at one swap
/// index. The swap's preimage is a separate concern, generated fresh per
/// swap by [`crate::htlc::generate_secret`] and known only to whichever
/// party will claim with it — it is never derived from key material.
#[derive(Debug, Clone)]
pub struct SwapKeyMaterial {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub key_index: u32,
}

/// HD wallet over a BIP-39 mnemonic, scoped to one native-chain network.
pub struct HdWallet {
    mnemonic: bip39::Mnemonic,
    network: bitcoin::Network,
}

impl HdWallet {
    /// Generate a new HD wallet with a random mnemonic.
    pub fn generate(network: bitcoin::Network, word_count: usize) -> Result<Self> {
        use bip39::{Language, Mnemonic};
        use rand::rngs::OsRng;

        let mnemonic = Mnemonic::generate_in_with(&mut OsRng, Language::English, word_count)
            .map_err(|e| Error::KeyDerivation(format!("failed to generate mnemonic: {e}")))?;

        Ok(Self { mnemonic, network })
    }

    /// Create an HD wallet from an existing mnemonic phrase.
    pub fn from_mnemonic(phrase: &str, network: bitcoin::Network) -> Result<Self> {
        use bip39::Mnemonic;

        let mnemonic =
            Mnemonic::from_str(phrase).map_err(|e| Error::KeyDerivation(format!("{e}")))?;

        Ok(Self { mnemonic, network })
    }

    pub fn mnemonic_phrase(&self) -> String {
        self.mnemonic.to_string()
    }

    /// Derive the claim-signing key for `index`.
    ///
    /// Derivation path: `m/{APP_PREFIX}'/{ROLE_CLAIM_SIGNING}'/{index}'`.
    pub fn derive_claim_key(&self, index: u32) -> Result<SwapKeyMaterial> {
        let material = self.derive_role_key(SigningRole::Claim, index)?;
        Ok(material)
    }

    /// Derive the refund-signing key for `index`. Distinct derivation
    /// subtree from the claim key: refund authority and claim authority can
    /// be split across two different hot/cold wallets without either one
    /// deriving the other's key.
    pub fn derive_refund_key(&self, index: u32) -> Result<SwapKeyMaterial> {
        let material = self.derive_role_key(SigningRole::Refund, index)?;
        Ok(material)
    }

    fn derive_role_key(&self, role: SigningRole, index: u32) -> Result<SwapKeyMaterial> {
        let secp = Secp256k1::new();
        let seed = self.mnemonic.to_seed("");
        let master = Xpriv::new_master(self.network, &seed)
            .map_err(|e| Error::KeyDerivation(format!("failed to derive master key: {e}")))?;

        let path_str = format!("m/{APP_PREFIX}'/{}'/{index}'", role.purpose());
        let path: DerivationPath = path_str
            .parse()
            .map_err(|e| Error::KeyDerivation(format!("invalid derivation path: {e}")))?;

        let derived = master
            .derive_priv(&secp, &path)
            .map_err(|e| Error::KeyDerivation(format!("key derivation failed: {e}")))?;

        let secret_key = derived.private_key;
        let public_key = secret_key.public_key(&secp);

        Ok(SwapKeyMaterial {
            secret_key,
            public_key,
            key_index: index,
        })
    }

    fn master_xpriv(&self) -> anyhow::Result<Xpriv> {
        let seed = self.mnemonic.to_seed("");
        Xpriv::new_master(self.network, &seed).context("failed to derive master xpriv")
    }

    /// Extended pubkey usable for watch-only recovery of claim-signing
    /// addresses, without exposing any secret key material.
    pub fn claim_xpub(&self) -> anyhow::Result<bitcoin::bip32::Xpub> {
        let secp = Secp256k1::new();
        let master = self.master_xpriv()?;
        let path_str = format!("m/{APP_PREFIX}'/{ROLE_CLAIM_SIGNING}'/0'");
        let path = DerivationPath::from_str(&path_str).context("invalid derivation path")?;
        let derived = master
            .derive_priv(&secp, &path)
            .context("failed to derive claim xpub branch")?;
        Ok(bitcoin::bip32::Xpub::from_priv(&secp, &derived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    #[test]
    fn generate_produces_requested_word_count() {
        let wallet = HdWallet::generate(Network::Bitcoin, 12).unwrap();
        assert_eq!(wallet.mnemonic_phrase().split_whitespace().count(), 12);
    }

    #[test]
    fn claim_and_refund_keys_at_same_index_are_independent() {
        let wallet = HdWallet::generate(Network::Bitcoin, 12).unwrap();
        let claim = wallet.derive_claim_key(0).unwrap();
        let refund = wallet.derive_refund_key(0).unwrap();
        assert_ne!(claim.secret_key.secret_bytes(), refund.secret_key.secret_bytes());
    }

    #[test]
    fn different_indices_produce_different_keys() {
        let wallet = HdWallet::generate(Network::Bitcoin, 12).unwrap();
        let a = wallet.derive_claim_key(0).unwrap();
        let b = wallet.derive_claim_key(1).unwrap();
        assert_ne!(a.secret_key.secret_bytes(), b.secret_key.secret_bytes());
    }

    #[test]
    fn same_mnemonic_and_index_reproduce_the_same_key() {
        let wallet1 = HdWallet::generate(Network::Bitcoin, 12).unwrap();
        let phrase = wallet1.mnemonic_phrase();
        let wallet2 = HdWallet::from_mnemonic(&phrase, Network::Bitcoin).unwrap();

        let a = wallet1.derive_claim_key(3).unwrap();
        let b = wallet2.derive_claim_key(3).unwrap();
        assert_eq!(a.secret_key.secret_bytes(), b.secret_key.secret_bytes());
    }
}
