use std::sync::Arc;
use tracing::{debug, instrument};

use crate::encoding::{self, Base64Layout};
use crate::error::CryptoError;
use crate::keystore::{GCM_NONCE_LEN, KeyAlias, KeyStoreAdapter};

/// The nonce used for every encryption in this tier.
///
/// Fixed so that ciphertexts written by earlier clients stay readable. The
/// consequence is that equal plaintexts under one key give equal ciphertexts
/// and that GCM's confidentiality bound does not hold across messages. Treat
/// this tier as deterministic encryption, not as a general AEAD.
pub const FIXED_NONCE: [u8; GCM_NONCE_LEN] = *b"fixed_direct";

/// AES-256-GCM under a key held by the store.
pub struct HardwareSymmetric {
    store: Arc<dyn KeyStoreAdapter>,
    alias: KeyAlias,
    layout: Base64Layout,
}

impl HardwareSymmetric {
    pub fn new(store: Arc<dyn KeyStoreAdapter>, alias: KeyAlias, layout: Base64Layout) -> Self {
        Self {
            store,
            alias,
            layout,
        }
    }

    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let key = self.store.get_symmetric_key(&self.alias)?;
        if key.randomized_encryption_required() {
            return Err(CryptoError::UnderlyingCipher(
                "stored key refuses a fixed nonce".to_string(),
            ));
        }
        let sealed = key
            .seal(&FIXED_NONCE, plaintext)
            .map_err(|_| CryptoError::UnderlyingCipher("AES-GCM encryption failed".to_string()))?;
        debug!(len = sealed.len(), "Sealed with fixed nonce");
        Ok(encoding::encode(&sealed, self.layout))
    }

    /// Any tag mismatch, including a truncated ciphertext or the wrong key,
    /// is reported as [`CryptoError::AuthenticationFailed`].
    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let sealed = encoding::decode(ciphertext)?;
        let key = self.store.get_symmetric_key(&self.alias)?;
        key.open(&FIXED_NONCE, &sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}
