use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::capability::Tier;
use crate::config::{KeyPairParams, ServiceConfig, SymmetricKeyParams};
use crate::error::KeyStoreError;
use crate::keystore::{KeyAlias, KeyStoreAdapter};

/// Makes sure the key material a tier needs exists in the store.
pub struct KeyManager {
    store: Arc<dyn KeyStoreAdapter>,
    symmetric: SymmetricKeyParams,
    key_pair: KeyPairParams,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStoreAdapter>) -> Self {
        Self::with_config(store, &ServiceConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyStoreAdapter>, config: &ServiceConfig) -> Self {
        Self {
            store,
            symmetric: config.symmetric.clone(),
            key_pair: config.key_pair.clone(),
        }
    }

    /// Generates material for `alias` if, and only if, nothing is stored under
    /// it yet.
    ///
    /// An existing entry is never replaced, even if it is of the wrong kind for
    /// `tier`; that mismatch shows up as
    /// [`KeyStoreError::Unrecoverable`] when the key is first used.
    #[instrument(skip(self), fields(alias = %alias))]
    pub fn ensure_key(&self, alias: &KeyAlias, tier: Tier) -> Result<(), KeyStoreError> {
        if !tier.requires_stored_key() {
            debug!("Tier needs no stored key");
            return Ok(());
        }

        if self.store.contains_alias(alias)? {
            debug!("Key already present");
            return Ok(());
        }

        match tier {
            Tier::HardwareSymmetric => {
                self.store.generate_symmetric_key(alias, &self.symmetric)?;
                info!(bits = self.symmetric.key_bits, "Generated symmetric key");
            }
            Tier::HardwareAsymmetric => {
                self.store.generate_key_pair(alias, &self.key_pair)?;
                info!(bits = self.key_pair.key_bits, "Generated key pair");
            }
            Tier::SoftwareDerived => {}
        }
        Ok(())
    }
}
