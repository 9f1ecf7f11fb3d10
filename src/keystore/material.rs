use rand::RngCore;
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;
use std::time::SystemTime;
use tracing::debug;
use zeroize::Zeroizing;

use super::{CertificateInfo, KeyAlias, KeyPairHandle, SymmetricKeyHandle};
use crate::config::{AES_256_KEY_BITS, KeyPairParams, SymmetricKeyParams};
use crate::error::KeyStoreError;

/// Key material as a store keeps it. Never leaves a store implementation.
#[derive(Clone)]
pub(crate) enum StoredKey {
    Symmetric {
        key: SecretSlice<u8>,
        randomized_encryption_required: bool,
    },
    KeyPair {
        /// PKCS#1 DER encoding of the private key
        private_der: SecretSlice<u8>,
        certificate: CertificateInfo,
    },
}

impl StoredKey {
    pub(crate) fn generate_symmetric(
        alias: &KeyAlias,
        params: &SymmetricKeyParams,
    ) -> Result<Self, KeyStoreError> {
        if params.key_bits != AES_256_KEY_BITS {
            return Err(KeyStoreError::generation_failed(
                alias,
                format!("unsupported AES key size {} bits", params.key_bits),
            ));
        }

        let mut key = Zeroizing::new(vec![0u8; usize::from(params.key_bits / 8)]);
        rand::rng().fill_bytes(&mut key);

        Ok(Self::Symmetric {
            key: SecretSlice::new(key.to_vec().into_boxed_slice()),
            randomized_encryption_required: params.randomized_encryption_required,
        })
    }

    pub(crate) fn generate_key_pair(
        alias: &KeyAlias,
        params: &KeyPairParams,
    ) -> Result<Self, KeyStoreError> {
        debug!(bits = params.key_bits, "Generating RSA key pair");
        let private = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, params.key_bits)
            .map_err(|e| KeyStoreError::generation_failed(alias, format!("RSA: {e}")))?;
        let der = private
            .to_pkcs1_der()
            .map_err(|e| KeyStoreError::generation_failed(alias, format!("PKCS#1: {e}")))?;

        Ok(Self::KeyPair {
            private_der: SecretSlice::new(der.as_bytes().to_vec().into_boxed_slice()),
            certificate: CertificateInfo::self_signed(params, SystemTime::now()),
        })
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Symmetric { .. } => "symmetric key",
            Self::KeyPair { .. } => "key pair",
        }
    }

    /// An entry of the other type is unrecoverable for this use, not missing.
    pub(crate) fn symmetric_handle(
        &self,
        alias: &KeyAlias,
    ) -> Result<SymmetricKeyHandle, KeyStoreError> {
        match self {
            Self::Symmetric {
                key,
                randomized_encryption_required,
            } => SymmetricKeyHandle::from_key_bytes(
                key.expose_secret(),
                *randomized_encryption_required,
            )
            .ok_or_else(|| KeyStoreError::unrecoverable(alias, "stored AES key has wrong length")),
            other => Err(KeyStoreError::unrecoverable(
                alias,
                format!("expected symmetric key, found {}", other.kind_name()),
            )),
        }
    }

    pub(crate) fn key_pair_handle(&self, alias: &KeyAlias) -> Result<KeyPairHandle, KeyStoreError> {
        match self {
            Self::KeyPair {
                private_der,
                certificate,
            } => {
                let private = RsaPrivateKey::from_pkcs1_der(private_der.expose_secret())
                    .map_err(|e| KeyStoreError::unrecoverable(alias, format!("PKCS#1: {e}")))?;
                Ok(KeyPairHandle::new(private, certificate.clone()))
            }
            other => Err(KeyStoreError::unrecoverable(
                alias,
                format!("expected key pair, found {}", other.kind_name()),
            )),
        }
    }
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoredKey").field(&self.kind_name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn symmetric_material_is_random_and_sized() {
        let alias = KeyAlias::from("a");
        let params = SymmetricKeyParams::default();
        let first = StoredKey::generate_symmetric(&alias, &params).unwrap();
        let second = StoredKey::generate_symmetric(&alias, &params).unwrap();
        match (&first, &second) {
            (StoredKey::Symmetric { key: a, .. }, StoredKey::Symmetric { key: b, .. }) => {
                assert_eq!(a.expose_secret().len(), 32);
                assert_ne!(a.expose_secret(), b.expose_secret());
            }
            _ => panic!("expected symmetric material"),
        }
        assert!(first.symmetric_handle(&alias).is_ok());
    }

    #[test]
    fn unsupported_aes_size_fails_generation() {
        let params = SymmetricKeyParams {
            key_bits: 128,
            ..Default::default()
        };
        let err = StoredKey::generate_symmetric(&KeyAlias::from("a"), &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyGenerationFailed);
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let stored = StoredKey::Symmetric {
            key: SecretSlice::new(vec![0xAB; 32].into_boxed_slice()),
            randomized_encryption_required: false,
        };
        let printed = format!("{stored:?}");
        assert_eq!(printed, format!("StoredKey({:?})", stored.kind_name()));
        assert!(!printed.contains("171"));
    }

    #[test]
    fn type_mismatch_is_unrecoverable() {
        let alias = KeyAlias::from("a");
        let symmetric =
            StoredKey::generate_symmetric(&alias, &SymmetricKeyParams::default()).unwrap();
        let err = symmetric.key_pair_handle(&alias).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyUnrecoverable);
    }

    #[test]
    fn key_pair_material_decodes() {
        let alias = KeyAlias::from("pw");
        let params = KeyPairParams {
            key_bits: 1024,
            ..Default::default()
        };
        let stored = StoredKey::generate_key_pair(&alias, &params).unwrap();
        let handle = stored.key_pair_handle(&alias).unwrap();
        assert_eq!(handle.block_len(), 128);
        assert_eq!(handle.max_plaintext_len(), 117);
        assert_eq!(handle.certificate().subject, params.subject);
        assert!(stored.symmetric_handle(&alias).is_err());
    }
}
