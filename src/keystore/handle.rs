use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::config::KeyPairParams;

pub const GCM_NONCE_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;

/// Bytes of every RSA block taken up by PKCS#1 v1.5 encryption padding.
const PKCS1_V15_OVERHEAD: usize = 11;
const SECS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Opaque handle to an AES-256 key held by a key store.
///
/// The key bytes are only ever inside the keyed cipher; there is no accessor
/// for them.
#[derive(Clone)]
pub struct SymmetricKeyHandle {
    cipher: Aes256Gcm,
    randomized_encryption_required: bool,
}

impl SymmetricKeyHandle {
    /// Returns `None` if `key` is not 32 bytes long.
    pub(crate) fn from_key_bytes(key: &[u8], randomized_encryption_required: bool) -> Option<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).ok()?;
        Some(Self {
            cipher,
            randomized_encryption_required,
        })
    }

    /// Whether the key refuses caller-chosen nonces.
    pub fn randomized_encryption_required(&self) -> bool {
        self.randomized_encryption_required
    }

    /// AES-GCM encrypt under a caller-chosen nonce. Output is ciphertext || tag.
    pub fn seal(&self, nonce: &[u8; GCM_NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        if self.randomized_encryption_required {
            return Err(aes_gcm::Error);
        }
        self.cipher.encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: b"",
            },
        )
    }

    /// AES-GCM decrypt and verify ciphertext || tag.
    pub fn open(&self, nonce: &[u8; GCM_NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        self.cipher.decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: b"",
            },
        )
    }
}

impl fmt::Debug for SymmetricKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeyHandle")
            .field("algorithm", &"AES-256-GCM")
            .field(
                "randomized_encryption_required",
                &self.randomized_encryption_required,
            )
            .finish_non_exhaustive()
    }
}

/// Metadata of the self-signed certificate issued alongside a key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub serial: u64,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

impl CertificateInfo {
    /// Certificate valid from `now` for `params.validity_years` 365-day years.
    pub fn self_signed(params: &KeyPairParams, now: SystemTime) -> Self {
        let validity = Duration::from_secs(SECS_PER_YEAR * u64::from(params.validity_years));
        Self {
            subject: params.subject.clone(),
            serial: params.serial,
            not_before: now,
            not_after: now.checked_add(validity).unwrap_or(now),
        }
    }

    pub fn is_valid_at(&self, at: SystemTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Opaque handle to an RSA key pair held by a key store.
///
/// The public half can be extracted; the private half is only usable through
/// [`KeyPairHandle::decrypt`].
#[derive(Clone)]
pub struct KeyPairHandle {
    private: RsaPrivateKey,
    certificate: CertificateInfo,
}

impl KeyPairHandle {
    pub(crate) fn new(private: RsaPrivateKey, certificate: CertificateInfo) -> Self {
        Self {
            private,
            certificate,
        }
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    pub fn certificate(&self) -> &CertificateInfo {
        &self.certificate
    }

    /// Modulus size in bytes, which is also the size of every ciphertext block.
    pub fn block_len(&self) -> usize {
        self.private.size()
    }

    /// Largest plaintext one PKCS#1 v1.5 block can carry.
    pub fn max_plaintext_len(&self) -> usize {
        self.block_len().saturating_sub(PKCS1_V15_OVERHEAD)
    }

    /// PKCS#1 v1.5 decrypt one block with the private half.
    pub fn decrypt(&self, block: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        self.private.decrypt(Pkcs1v15Encrypt, block)
    }
}

impl fmt::Debug for KeyPairHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPairHandle")
            .field("modulus_bits", &(self.block_len() * 8))
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}
