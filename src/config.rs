//! Tunables for key generation and ciphertext layout.
//!
//! The defaults reproduce the parameters existing ciphertexts were produced
//! with; changing them only affects keys generated afterwards.

use serde::{Deserialize, Serialize};

use crate::encoding::Base64Layout;

/// Placeholder identity put on the self-signed certificate of every key pair.
pub const DEFAULT_CERT_SUBJECT: &str = "CN=Sample Name, O=Android Authority";
pub const DEFAULT_CERT_VALIDITY_YEARS: u32 = 20;
pub const DEFAULT_RSA_KEY_BITS: usize = 2048;
pub const AES_256_KEY_BITS: u16 = 256;

/// Parameters for generating a symmetric key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymmetricKeyParams {
    pub key_bits: u16,
    /// Whether the store should refuse caller-chosen nonces. The symmetric
    /// tier uses a fixed nonce, so this stays off.
    pub randomized_encryption_required: bool,
}

impl Default for SymmetricKeyParams {
    fn default() -> Self {
        Self {
            key_bits: AES_256_KEY_BITS,
            randomized_encryption_required: false,
        }
    }
}

/// Parameters for generating an RSA key pair and its self-signed certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPairParams {
    pub key_bits: usize,
    pub subject: String,
    pub serial: u64,
    pub validity_years: u32,
}

impl Default for KeyPairParams {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_RSA_KEY_BITS,
            subject: DEFAULT_CERT_SUBJECT.to_string(),
            serial: 1,
            validity_years: DEFAULT_CERT_VALIDITY_YEARS,
        }
    }
}

/// Configuration of an [`EncryptionService`](crate::EncryptionService).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub symmetric: SymmetricKeyParams,
    pub key_pair: KeyPairParams,
    pub base64_layout: Base64Layout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_legacy_parameters() {
        let config = ServiceConfig::default();
        assert_eq!(config.symmetric.key_bits, 256);
        assert!(!config.symmetric.randomized_encryption_required);
        assert_eq!(config.key_pair.key_bits, 2048);
        assert_eq!(config.key_pair.serial, 1);
        assert_eq!(config.key_pair.validity_years, 20);
        assert_eq!(config.base64_layout, Base64Layout::Wrapped);
    }

    #[test]
    fn bincode_round_trip_keeps_overrides() {
        let config = ServiceConfig {
            key_pair: KeyPairParams {
                key_bits: 1024,
                ..Default::default()
            },
            base64_layout: Base64Layout::SingleLine,
            ..Default::default()
        };
        let bytes = bincode::serde::encode_to_vec(&config, bincode::config::standard())
            .expect("encode config");
        let (decoded, _): (ServiceConfig, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .expect("decode config");
        assert_eq!(decoded, config);
    }
}
