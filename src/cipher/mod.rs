//! The three cipher strategies, one per [`Tier`].
//!
//! A service binds exactly one strategy at construction. Ciphertexts carry no
//! tier tag, so decrypting with a different strategy than the one that wrote
//! the blob fails (or, for the software tier, yields garbage padding errors).

mod asymmetric;
mod derived;
mod symmetric;

use std::sync::Arc;

pub use asymmetric::HardwareAsymmetric;
pub use derived::{DERIVED_KEY_LEN, SoftwareDerived, derive_key};
pub use symmetric::{FIXED_NONCE, HardwareSymmetric};

use crate::capability::Tier;
use crate::encoding::Base64Layout;
use crate::error::CryptoError;
use crate::keystore::{KeyAlias, KeyStoreAdapter};

pub enum CipherStrategy {
    HardwareSymmetric(HardwareSymmetric),
    HardwareAsymmetric(HardwareAsymmetric),
    SoftwareDerived(SoftwareDerived),
}

impl CipherStrategy {
    pub fn for_tier(
        tier: Tier,
        store: Arc<dyn KeyStoreAdapter>,
        alias: KeyAlias,
        layout: Base64Layout,
    ) -> Self {
        match tier {
            Tier::HardwareSymmetric => {
                Self::HardwareSymmetric(HardwareSymmetric::new(store, alias, layout))
            }
            Tier::HardwareAsymmetric => {
                Self::HardwareAsymmetric(HardwareAsymmetric::new(store, alias, layout))
            }
            Tier::SoftwareDerived => Self::SoftwareDerived(SoftwareDerived::new(alias, layout)),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Self::HardwareSymmetric(_) => Tier::HardwareSymmetric,
            Self::HardwareAsymmetric(_) => Tier::HardwareAsymmetric,
            Self::SoftwareDerived(_) => Tier::SoftwareDerived,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        match self {
            Self::HardwareSymmetric(c) => c.encrypt(plaintext),
            Self::HardwareAsymmetric(c) => c.encrypt(plaintext),
            Self::SoftwareDerived(c) => c.encrypt(plaintext),
        }
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        match self {
            Self::HardwareSymmetric(c) => c.decrypt(ciphertext),
            Self::HardwareAsymmetric(c) => c.decrypt(ciphertext),
            Self::SoftwareDerived(c) => c.decrypt(ciphertext),
        }
    }
}

impl std::fmt::Debug for CipherStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CipherStrategy").field(&self.tier()).finish()
    }
}
