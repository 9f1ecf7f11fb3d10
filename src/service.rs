//! The public facade: one alias, one tier, one strategy.

use tracing::{debug, error, info, instrument, warn};

use crate::capability::{Tier, resolve_tier};
use crate::cipher::CipherStrategy;
use crate::config::ServiceConfig;
use crate::context::PlatformContext;
use crate::error::{CryptoError, KeyStoreError};
use crate::key_manager::KeyManager;
use crate::keystore::KeyAlias;

/// Encrypts and decrypts strings under a single alias.
///
/// The tier is picked once, from the context's capabilities, when the service
/// is built, and the key material it needs is created then if missing.
/// Construction never fails: a store error during setup is kept in
/// [`setup_error`](Self::setup_error) and every later call reports its own
/// failure when it reaches the store.
///
/// Ciphertexts carry no tier marker. A blob written under one tier can only be
/// read back by a service that resolves to the same tier and alias.
#[derive(Debug)]
pub struct EncryptionService {
    alias: KeyAlias,
    tier: Tier,
    strategy: CipherStrategy,
    setup_error: Option<KeyStoreError>,
}

impl EncryptionService {
    pub fn new(context: PlatformContext, alias: impl Into<KeyAlias>) -> Self {
        Self::with_config(context, alias, ServiceConfig::default())
    }

    #[instrument(skip_all, fields(alias))]
    pub fn with_config(
        context: PlatformContext,
        alias: impl Into<KeyAlias>,
        config: ServiceConfig,
    ) -> Self {
        let alias = alias.into();
        tracing::Span::current().record("alias", alias.as_str());

        let tier = resolve_tier(&context.capabilities());
        info!(%tier, "Resolved encryption tier");

        let manager = KeyManager::with_config(context.key_store().clone(), &config);
        let setup_error = match manager.ensure_key(&alias, tier) {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "Key setup failed; calls will fail until the store recovers");
                Some(e)
            }
        };

        let strategy = CipherStrategy::for_tier(
            tier,
            context.key_store().clone(),
            alias.clone(),
            config.base64_layout,
        );

        Self {
            alias,
            tier,
            strategy,
            setup_error,
        }
    }

    pub fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The store error hit while ensuring key material at construction, if any.
    pub fn setup_error(&self) -> Option<&KeyStoreError> {
        self.setup_error.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.setup_error.is_none()
    }

    #[instrument(level = "debug", skip_all, fields(alias = %self.alias, tier = %self.tier))]
    pub fn try_encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let encrypted = self.strategy.encrypt(plaintext.as_bytes())?;
        debug!(len = encrypted.len(), "Encrypted");
        Ok(encrypted)
    }

    #[instrument(level = "debug", skip_all, fields(alias = %self.alias, tier = %self.tier))]
    pub fn try_decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let plaintext = self.strategy.decrypt(ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Encoding("decrypted bytes are not valid UTF-8".to_string()))
    }

    /// `None` means the call failed; the reason is logged.
    pub fn encrypt_data(&self, plaintext: &str) -> Option<String> {
        match self.try_encrypt(plaintext) {
            Ok(encrypted) => Some(encrypted),
            Err(e) => {
                error!(alias = %self.alias, kind = ?e.kind(), error = %e, "Encryption failed");
                None
            }
        }
    }

    /// `None` means the call failed; the reason is logged.
    pub fn decrypt_data(&self, ciphertext: &str) -> Option<String> {
        match self.try_decrypt(ciphertext) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                warn!(alias = %self.alias, kind = ?e.kind(), error = %e, "Decryption failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PlatformCapabilities;
    use crate::cipher::derive_key;
    use crate::config::KeyPairParams;
    use crate::crypt::MasterKey;
    use crate::encoding::Base64Layout;
    use crate::error::ErrorKind;
    use crate::keystore::{KeyStoreAdapter, MemoryKeyStore};
    use crate::kv::{MasterKeyProtection, SledKeyStore};
    use std::sync::Arc;
    use tracing_test::traced_test;

    /// RSA-1024 keeps key generation fast; the 2048-bit capacity is covered
    /// separately.
    fn fast_config() -> ServiceConfig {
        ServiceConfig {
            key_pair: KeyPairParams {
                key_bits: 1024,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn context(store: &Arc<MemoryKeyStore>, capabilities: PlatformCapabilities) -> PlatformContext {
        PlatformContext::new(store.clone()).with_capabilities(capabilities)
    }

    fn service_for(tier: Tier, store: &Arc<MemoryKeyStore>, alias: &str) -> EncryptionService {
        let capabilities = match tier {
            Tier::HardwareSymmetric => PlatformCapabilities::all(),
            Tier::HardwareAsymmetric => PlatformCapabilities::new(false, true),
            Tier::SoftwareDerived => PlatformCapabilities::none(),
        };
        let service =
            EncryptionService::with_config(context(store, capabilities), alias, fast_config());
        assert_eq!(service.tier(), tier);
        service
    }

    const ALL_TIERS: [Tier; 3] = [
        Tier::HardwareSymmetric,
        Tier::HardwareAsymmetric,
        Tier::SoftwareDerived,
    ];

    #[test]
    #[traced_test]
    fn round_trip_every_tier() {
        for tier in ALL_TIERS {
            let store = Arc::new(MemoryKeyStore::new());
            let service = service_for(tier, &store, "user_token");
            assert!(service.is_ready());
            for text in ["", "hello-world", "ünïcødé ✓", "x".repeat(100).as_str()] {
                let encrypted = service.encrypt_data(text).unwrap();
                assert_eq!(service.decrypt_data(&encrypted).as_deref(), Some(text), "{tier}");
            }
        }
        assert!(logs_contain("Resolved encryption tier"));
    }

    #[test]
    fn symmetric_and_derived_tiers_are_deterministic() {
        for tier in [Tier::HardwareSymmetric, Tier::SoftwareDerived] {
            let store = Arc::new(MemoryKeyStore::new());
            let service = service_for(tier, &store, "det");
            assert_eq!(
                service.encrypt_data("same input"),
                service.encrypt_data("same input")
            );
        }
    }

    #[test]
    fn aliases_are_isolated() {
        let store = Arc::new(MemoryKeyStore::new());
        let a = service_for(Tier::HardwareSymmetric, &store, "a");
        let b = service_for(Tier::HardwareSymmetric, &store, "b");
        let encrypted = a.encrypt_data("for a only").unwrap();

        assert_eq!(
            b.try_decrypt(&encrypted).unwrap_err().kind(),
            ErrorKind::AuthenticationFailed
        );
        assert_eq!(b.decrypt_data(&encrypted), None);

        let rsa_store = Arc::new(MemoryKeyStore::new());
        let rsa_a = service_for(Tier::HardwareAsymmetric, &rsa_store, "a");
        let rsa_b = service_for(Tier::HardwareAsymmetric, &rsa_store, "b");
        let encrypted = rsa_a.encrypt_data("for a only").unwrap();
        assert_eq!(
            rsa_b.try_decrypt(&encrypted).unwrap_err().kind(),
            ErrorKind::AuthenticationFailed
        );
        let unknown = service_for(Tier::HardwareAsymmetric, &rsa_store, "c");
        rsa_store.delete_entry(&KeyAlias::from("c")).unwrap();
        assert_eq!(
            unknown.try_decrypt(&encrypted).unwrap_err().kind(),
            ErrorKind::KeyNotFound
        );

        let soft_a = service_for(Tier::SoftwareDerived, &store, "a");
        let soft_b = service_for(Tier::SoftwareDerived, &store, "b");
        let encrypted = soft_a.encrypt_data("for a only").unwrap();
        assert_ne!(soft_b.decrypt_data(&encrypted).as_deref(), Some("for a only"));
    }

    #[test]
    fn second_construction_reuses_the_key() {
        let store = Arc::new(MemoryKeyStore::new());
        let first = service_for(Tier::HardwareSymmetric, &store, "token");
        let encrypted = first.encrypt_data("kept").unwrap();

        let second = service_for(Tier::HardwareSymmetric, &store, "token");
        assert_eq!(store.generated_count(), 1);
        assert_eq!(second.decrypt_data(&encrypted).as_deref(), Some("kept"));
    }

    #[test]
    #[traced_test]
    fn unavailable_store_is_recorded_not_raised() {
        let store = Arc::new(MemoryKeyStore::unavailable());
        let service = EncryptionService::new(PlatformContext::new(store), "token");

        assert!(!service.is_ready());
        assert_eq!(
            service.setup_error().map(KeyStoreError::kind),
            Some(ErrorKind::KeyStoreUnavailable)
        );
        assert_eq!(service.encrypt_data("x"), None);
        assert_eq!(
            service.try_encrypt("x").unwrap_err().kind(),
            ErrorKind::KeyStoreUnavailable
        );
        assert!(logs_contain("Key setup failed"));
    }

    #[test]
    fn failed_generation_surfaces_as_missing_key() {
        let store = Arc::new(MemoryKeyStore::failing_generation());
        let service = EncryptionService::new(PlatformContext::new(store), "token");

        assert_eq!(
            service.setup_error().map(KeyStoreError::kind),
            Some(ErrorKind::KeyGenerationFailed)
        );
        assert_eq!(
            service.try_encrypt("x").unwrap_err().kind(),
            ErrorKind::KeyNotFound
        );
    }

    #[test]
    fn deleted_key_is_not_found() {
        let store = Arc::new(MemoryKeyStore::new());
        let service = service_for(Tier::HardwareSymmetric, &store, "token");
        let encrypted = service.encrypt_data("gone soon").unwrap();

        assert!(store.delete_entry(&KeyAlias::from("token")).unwrap());
        assert_eq!(
            service.try_decrypt(&encrypted).unwrap_err().kind(),
            ErrorKind::KeyNotFound
        );
    }

    #[test]
    fn garbage_input_is_an_encoding_error() {
        let store = Arc::new(MemoryKeyStore::new());
        for tier in ALL_TIERS {
            let service = service_for(tier, &store, "token");
            assert_eq!(
                service.try_decrypt("not base64!").unwrap_err().kind(),
                ErrorKind::EncodingError
            );
        }
    }

    #[test]
    fn non_utf8_plaintext_is_an_encoding_error() {
        let store = Arc::new(MemoryKeyStore::new());
        let service = service_for(Tier::SoftwareDerived, &store, "token");
        let raw = crate::cipher::SoftwareDerived::new("token".into(), Base64Layout::Wrapped)
            .encrypt(&[0xff, 0xfe])
            .unwrap();
        assert_eq!(
            service.try_decrypt(&raw).unwrap_err().kind(),
            ErrorKind::EncodingError
        );
    }

    #[test]
    fn legacy_software_scenario() {
        let store = Arc::new(MemoryKeyStore::new());
        let service = EncryptionService::with_config(
            context(&store, PlatformCapabilities::from_api_level(16)),
            "user_token",
            ServiceConfig {
                base64_layout: Base64Layout::SingleLine,
                ..Default::default()
            },
        );

        assert_eq!(service.tier(), Tier::SoftwareDerived);
        assert_eq!(
            derive_key(service.alias())
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
            "a854e557b1b14814750c7c7b0c9315e6"
        );
        assert_eq!(
            service.encrypt_data("hello-world").as_deref(),
            Some("FCS58LYGSngoYD++ITdcjQ==")
        );
        assert_eq!(
            service.decrypt_data("FCS58LYGSngoYD++ITdcjQ==").as_deref(),
            Some("hello-world")
        );
        // hand-trimmed blobs without padding still open
        assert_eq!(
            service.decrypt_data("FCS58LYGSngoYD++ITdcjQ").as_deref(),
            Some("hello-world")
        );
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn oversized_rsa_plaintext_scenario() {
        let store = Arc::new(MemoryKeyStore::new());
        let service = EncryptionService::new(
            context(&store, PlatformCapabilities::from_api_level(21)),
            "pw",
        );

        assert_eq!(service.tier(), Tier::HardwareAsymmetric);
        let err = service.try_encrypt(&"p".repeat(300)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnderlyingCipherError);
        assert_eq!(service.encrypt_data(&"p".repeat(300)), None);
    }

    #[test]
    fn service_is_shareable_across_threads() {
        let store = Arc::new(MemoryKeyStore::new());
        let service = Arc::new(service_for(Tier::HardwareSymmetric, &store, "shared"));
        let expected = service.encrypt_data("concurrent").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                std::thread::spawn(move || service.encrypt_data("concurrent"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().as_deref(), Some(expected.as_str()));
        }
    }

    #[test]
    fn sled_backed_service_persists_keys() {
        let dir = tempfile::tempdir().unwrap();
        let master_key = MasterKey::generate();
        let open = || -> Arc<dyn KeyStoreAdapter> {
            Arc::new(
                SledKeyStore::open(
                    dir.path(),
                    "app",
                    MasterKeyProtection::Provided(master_key.clone()),
                )
                .unwrap(),
            )
        };

        let encrypted = {
            let service = EncryptionService::new(PlatformContext::new(open()), "token");
            assert_eq!(service.tier(), Tier::HardwareSymmetric);
            service.encrypt_data("on disk").unwrap()
        };

        let service = EncryptionService::new(PlatformContext::new(open()), "token");
        assert!(service.is_ready());
        assert_eq!(service.decrypt_data(&encrypted).as_deref(), Some("on disk"));
    }
}
