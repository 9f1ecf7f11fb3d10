//! The secure key store seam.
//!
//! The core never holds raw key bytes: it asks a [`KeyStoreAdapter`] for a
//! handle on every call and runs cipher operations through it. Two adapters
//! ship with the crate, the in-process [`MemoryKeyStore`] and the persistent
//! [`SledKeyStore`](crate::kv::SledKeyStore).

mod handle;
mod material;
mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::PlatformCapabilities;
use crate::config::{KeyPairParams, SymmetricKeyParams};
use crate::error::KeyStoreError;

pub use handle::{CertificateInfo, GCM_NONCE_LEN, GCM_TAG_LEN, KeyPairHandle, SymmetricKeyHandle};
pub(crate) use material::StoredKey;
pub use memory::MemoryKeyStore;

/// Caller-chosen name of one logical secret.
///
/// Must be stable across restarts to reach the same key. It is a lookup key,
/// not secret material, except for the software tier where the key is derived
/// from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyAlias(String);

impl KeyAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for KeyAlias {
    fn from(alias: &str) -> Self {
        Self::new(alias)
    }
}

impl From<String> for KeyAlias {
    fn from(alias: String) -> Self {
        Self(alias)
    }
}

impl AsRef<str> for KeyAlias {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A secure key store addressed by alias.
///
/// Implementations must tolerate redundant generation: if an entry appeared
/// under the alias between the caller's `contains_alias` check and the
/// `generate_*` call, the existing entry is kept and `Ok(())` is returned.
/// The core adds no locking of its own, so sharing one service across threads
/// is only as safe as the store is.
pub trait KeyStoreAdapter: Send + Sync {
    /// What this store can generate.
    fn capabilities(&self) -> PlatformCapabilities;

    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool, KeyStoreError>;

    /// Create and persist an AES key usable only for encryption and decryption.
    fn generate_symmetric_key(
        &self,
        alias: &KeyAlias,
        params: &SymmetricKeyParams,
    ) -> Result<(), KeyStoreError>;

    /// Create and persist an RSA key pair with a self-signed certificate.
    fn generate_key_pair(&self, alias: &KeyAlias, params: &KeyPairParams)
    -> Result<(), KeyStoreError>;

    fn get_symmetric_key(&self, alias: &KeyAlias) -> Result<SymmetricKeyHandle, KeyStoreError>;

    fn get_key_pair(&self, alias: &KeyAlias) -> Result<KeyPairHandle, KeyStoreError>;

    /// Remove the entry under `alias`. Returns whether anything was removed.
    fn delete_entry(&self, alias: &KeyAlias) -> Result<bool, KeyStoreError>;
}
