use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use zeroize::{Zeroize, Zeroizing};

use crate::keystore::GCM_NONCE_LEN;

/// Domain separation for every session key derived from a master key.
const SESSION_KEY_SALT: &[u8] = b"tiervault/session-key/v1";

/// Root secret of a persistent key store.
///
/// Every entry in a [`SledKeyStore`](crate::kv::SledKeyStore) is sealed under a
/// key derived from this one, so losing it makes every stored key
/// unrecoverable, and leaking it exposes all of them.
#[derive(Clone)]
pub struct MasterKey {
    key: SecretSlice<u8>,
}

impl MasterKey {
    pub const LEN: usize = 32;

    /// A fresh random master key.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; Self::LEN]);
        rand::rng().fill_bytes(&mut key[..]);
        Self {
            key: SecretSlice::new(key.to_vec().into_boxed_slice()),
        }
    }

    /// Returns `None` unless `key` is exactly [`MasterKey::LEN`] bytes.
    pub fn from_slice(key: &[u8]) -> Option<Self> {
        if key.len() != Self::LEN {
            return None;
        }
        Some(Self {
            key: SecretSlice::new(key.to_vec().into_boxed_slice()),
        })
    }

    pub fn key(&self) -> &SecretSlice<u8> {
        &self.key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// A key derived from a [`MasterKey`] for one context (one store entry).
///
/// Seals with AES-256-GCM under a random nonce; the context should also be
/// passed as associated data so a sealed blob cannot be moved to another slot.
pub struct SessionKey {
    key: SecretSlice<u8>,
}

impl SessionKey {
    /// HKDF-SHA256 expand of the master key over `context`.
    pub fn derive(master_key: &MasterKey, context: &[u8]) -> Self {
        let mut key = [0u8; 32];
        let hkdf = Hkdf::<sha2::Sha256>::new(Some(SESSION_KEY_SALT), master_key.key().expose_secret());
        hkdf.expand(context, &mut key)
            .expect("hkdf expansion of 32 bytes failed");

        let session_key = Self {
            key: SecretSlice::new(key.to_vec().into_boxed_slice()),
        };
        key.zeroize();
        session_key
    }

    fn cipher(&self) -> Result<Aes256Gcm, aes_gcm::Error> {
        Aes256Gcm::new_from_slice(self.key.expose_secret()).map_err(|_| aes_gcm::Error)
    }

    /// Encrypts under a fresh random nonce, returned alongside ciphertext || tag.
    pub fn seal(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<([u8; GCM_NONCE_LEN], Vec<u8>), aes_gcm::Error> {
        let mut nonce = [0u8; GCM_NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = self.cipher()?.encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )?;
        Ok((nonce, ciphertext))
    }

    pub fn open(
        &self,
        nonce: &[u8; GCM_NONCE_LEN],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, aes_gcm::Error> {
        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map(Zeroizing::new)
    }
}
