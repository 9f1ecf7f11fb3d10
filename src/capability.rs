//! Capability detection: which encryption tier a host can support.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform API level from which hardware-backed AEAD keys can be generated.
pub const AEAD_KEYS_MIN_API_LEVEL: u32 = 23;
/// Platform API level from which hardware-backed key pairs can be generated.
pub const KEY_PAIRS_MIN_API_LEVEL: u32 = 18;

/// What kind of key material the host's secure key store can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PlatformCapabilities {
    /// Hardware-backed symmetric keys usable for AEAD.
    pub hardware_aead: bool,
    /// Hardware-backed asymmetric key pairs.
    pub hardware_key_pair: bool,
}

impl PlatformCapabilities {
    pub const fn new(hardware_aead: bool, hardware_key_pair: bool) -> Self {
        Self {
            hardware_aead,
            hardware_key_pair,
        }
    }

    pub const fn all() -> Self {
        Self::new(true, true)
    }

    /// A host with no secure key storage at all.
    pub const fn none() -> Self {
        Self::new(false, false)
    }

    /// Capabilities implied by a platform API level.
    pub const fn from_api_level(level: u32) -> Self {
        Self::new(
            level >= AEAD_KEYS_MIN_API_LEVEL,
            level >= KEY_PAIRS_MIN_API_LEVEL,
        )
    }

    /// Only the capabilities present in both descriptors.
    pub const fn intersect(self, other: Self) -> Self {
        Self::new(
            self.hardware_aead && other.hardware_aead,
            self.hardware_key_pair && other.hardware_key_pair,
        )
    }
}

/// The encryption scheme bound to an [`EncryptionService`](crate::EncryptionService).
///
/// Tiers are mutually incompatible: a ciphertext can only be decrypted by the
/// tier that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// AES-256-GCM with a key held by the secure key store.
    HardwareSymmetric,
    /// RSA PKCS#1 v1.5 with a key pair held by the secure key store.
    HardwareAsymmetric,
    /// AES-128 with a key derived from the alias. Nothing is stored.
    SoftwareDerived,
}

impl Tier {
    /// Whether this tier needs an entry in the key store.
    pub fn requires_stored_key(self) -> bool {
        !matches!(self, Tier::SoftwareDerived)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::HardwareSymmetric => "hardware-symmetric",
            Tier::HardwareAsymmetric => "hardware-asymmetric",
            Tier::SoftwareDerived => "software-derived",
        };
        f.write_str(name)
    }
}

/// Picks the highest tier the capabilities allow. Total: the software tier is
/// always available.
pub fn resolve_tier(capabilities: &PlatformCapabilities) -> Tier {
    if capabilities.hardware_aead {
        Tier::HardwareSymmetric
    } else if capabilities.hardware_key_pair {
        Tier::HardwareAsymmetric
    } else {
        Tier::SoftwareDerived
    }
}
