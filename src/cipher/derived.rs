use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, block_padding::Pkcs7};
use sha1::{Digest, Sha1};
use tracing::instrument;
use zeroize::Zeroizing;

use crate::encoding::{self, Base64Layout};
use crate::error::CryptoError;
use crate::keystore::KeyAlias;

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

pub const DERIVED_KEY_LEN: usize = 16;
const AES_BLOCK_LEN: usize = 16;

/// First 16 bytes of SHA-1 over the alias. Lives only for one call.
pub fn derive_key(alias: &KeyAlias) -> Zeroizing<[u8; DERIVED_KEY_LEN]> {
    let mut digest = Sha1::digest(alias.as_bytes());
    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    key.copy_from_slice(&digest[..DERIVED_KEY_LEN]);
    digest.as_mut_slice().fill(0);
    key
}

/// Fallback for hosts without secure key storage: AES-128-ECB with PKCS#7
/// padding under a key derived from the alias.
///
/// **This provides no real secrecy.** Anyone who knows the alias can derive
/// the key, and ECB leaks equal plaintext blocks. It exists so data written by
/// legacy clients stays readable; do not model new schemes on it.
pub struct SoftwareDerived {
    alias: KeyAlias,
    layout: Base64Layout,
}

impl SoftwareDerived {
    pub fn new(alias: KeyAlias, layout: Base64Layout) -> Self {
        Self { alias, layout }
    }

    fn cipher_error(what: &str) -> CryptoError {
        CryptoError::UnderlyingCipher(what.to_string())
    }

    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let key = derive_key(&self.alias);
        let ciphertext = Aes128EcbEnc::new_from_slice(&key[..])
            .map_err(|_| Self::cipher_error("derived key has wrong length"))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        Ok(encoding::encode(&ciphertext, self.layout))
    }

    /// A wrong alias almost always shows up as a padding error, but ECB
    /// carries no integrity check so this is not guaranteed.
    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let bytes = encoding::decode(ciphertext)?;
        if bytes.is_empty() || bytes.len() % AES_BLOCK_LEN != 0 {
            return Err(Self::cipher_error(
                "ciphertext is not a whole number of AES blocks",
            ));
        }

        let key = derive_key(&self.alias);
        Aes128EcbDec::new_from_slice(&key[..])
            .map_err(|_| Self::cipher_error("derived key has wrong length"))?
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
            .map_err(|_| Self::cipher_error("bad padding"))
    }
}
