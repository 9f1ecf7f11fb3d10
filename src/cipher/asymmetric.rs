use rsa::Pkcs1v15Encrypt;
use std::sync::Arc;
use tracing::instrument;

use crate::encoding::{self, Base64Layout};
use crate::error::CryptoError;
use crate::keystore::{KeyAlias, KeyStoreAdapter};

/// RSA PKCS#1 v1.5 under a key pair held by the store.
///
/// One plaintext, one RSA block: inputs longer than the block capacity
/// (245 bytes for a 2048-bit key) are rejected, never chunked. There is no
/// integrity guarantee beyond what the padding check happens to catch.
pub struct HardwareAsymmetric {
    store: Arc<dyn KeyStoreAdapter>,
    alias: KeyAlias,
    layout: Base64Layout,
}

impl HardwareAsymmetric {
    pub fn new(store: Arc<dyn KeyStoreAdapter>, alias: KeyAlias, layout: Base64Layout) -> Self {
        Self {
            store,
            alias,
            layout,
        }
    }

    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let key_pair = self.store.get_key_pair(&self.alias)?;
        let capacity = key_pair.max_plaintext_len();
        if plaintext.len() > capacity {
            return Err(CryptoError::UnderlyingCipher(format!(
                "plaintext of {} bytes exceeds the {capacity}-byte RSA block capacity",
                plaintext.len()
            )));
        }

        let block = key_pair
            .public_key()
            .encrypt(&mut rsa::rand_core::OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::UnderlyingCipher(format!("RSA encryption: {e}")))?;
        Ok(encoding::encode(&block, self.layout))
    }

    /// A block that does not unpad under this key pair, which is what a blob
    /// from another alias looks like, is [`CryptoError::AuthenticationFailed`].
    /// A block of the wrong size never reaches the key.
    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let block = encoding::decode(ciphertext)?;
        let key_pair = self.store.get_key_pair(&self.alias)?;
        if block.len() != key_pair.block_len() {
            return Err(CryptoError::UnderlyingCipher(format!(
                "ciphertext of {} bytes is not one {}-byte RSA block",
                block.len(),
                key_pair.block_len()
            )));
        }

        key_pair.decrypt(&block).map_err(|e| match e {
            rsa::Error::Decryption => CryptoError::AuthenticationFailed,
            other => CryptoError::UnderlyingCipher(format!("RSA decryption: {other}")),
        })
    }
}
