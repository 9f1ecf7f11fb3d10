use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument};

use super::{KeyAlias, KeyPairHandle, KeyStoreAdapter, StoredKey, SymmetricKeyHandle};
use crate::capability::PlatformCapabilities;
use crate::config::{KeyPairParams, SymmetricKeyParams};
use crate::error::KeyStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectedFailure {
    /// Every operation reports the store as unavailable.
    Unavailable,
    /// Lookups work, generation fails.
    Generation,
}

/// A key store that lives in process memory and forgets everything on drop.
///
/// Useful on hosts without any secure storage and as the fake behind tests.
/// Its capabilities are whatever it was built with, so it can stand in for any
/// host.
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<KeyAlias, StoredKey>>,
    capabilities: PlatformCapabilities,
    failure: Option<InjectedFailure>,
    generated: AtomicUsize,
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyStore {
    /// A store that can generate every kind of key.
    pub fn new() -> Self {
        Self::with_capabilities(PlatformCapabilities::all())
    }

    pub fn with_capabilities(capabilities: PlatformCapabilities) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capabilities,
            failure: None,
            generated: AtomicUsize::new(0),
        }
    }

    /// A store whose every operation fails with `Unavailable`.
    pub fn unavailable() -> Self {
        Self {
            failure: Some(InjectedFailure::Unavailable),
            ..Self::new()
        }
    }

    /// A store that answers lookups but fails every generation.
    pub fn failing_generation() -> Self {
        Self {
            failure: Some(InjectedFailure::Generation),
            ..Self::new()
        }
    }

    /// How many entries this store has generated over its lifetime.
    pub fn generated_count(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Number of stored entries. Fails like every other call when the store
    /// is offline, rather than pretending to be empty.
    pub fn len(&self) -> Result<usize, KeyStoreError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, KeyStoreError> {
        Ok(self.len()? == 0)
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<KeyAlias, StoredKey>>, KeyStoreError> {
        if self.failure == Some(InjectedFailure::Unavailable) {
            return Err(KeyStoreError::Unavailable(
                "memory key store is offline".to_string(),
            ));
        }
        self.entries
            .lock()
            .map_err(|_| KeyStoreError::Unavailable("memory key store lock poisoned".to_string()))
    }

    fn check_generation(&self, alias: &KeyAlias) -> Result<(), KeyStoreError> {
        match self.failure {
            Some(InjectedFailure::Generation) => Err(KeyStoreError::generation_failed(
                alias,
                "generation disabled for this store",
            )),
            _ => Ok(()),
        }
    }

    /// Keeps whichever entry got there first.
    fn insert_if_absent(&self, alias: &KeyAlias, stored: StoredKey) -> Result<(), KeyStoreError> {
        match self.entries()?.entry(alias.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(stored);
                self.generated.fetch_add(1, Ordering::SeqCst);
            }
            Entry::Occupied(existing) => {
                debug!(
                    existing = existing.get().kind_name(),
                    "Alias already populated, discarding freshly generated material"
                );
            }
        }
        Ok(())
    }

    fn load(&self, alias: &KeyAlias) -> Result<StoredKey, KeyStoreError> {
        self.entries()?
            .get(alias)
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(alias.clone()))
    }
}

impl KeyStoreAdapter for MemoryKeyStore {
    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool, KeyStoreError> {
        Ok(self.entries()?.contains_key(alias))
    }

    #[instrument(level = "debug", skip(self, params), fields(alias = %alias))]
    fn generate_symmetric_key(
        &self,
        alias: &KeyAlias,
        params: &SymmetricKeyParams,
    ) -> Result<(), KeyStoreError> {
        self.entries()?;
        self.check_generation(alias)?;
        let stored = StoredKey::generate_symmetric(alias, params)?;
        self.insert_if_absent(alias, stored)
    }

    #[instrument(level = "debug", skip(self, params), fields(alias = %alias))]
    fn generate_key_pair(
        &self,
        alias: &KeyAlias,
        params: &KeyPairParams,
    ) -> Result<(), KeyStoreError> {
        self.entries()?;
        self.check_generation(alias)?;
        let stored = StoredKey::generate_key_pair(alias, params)?;
        self.insert_if_absent(alias, stored)
    }

    fn get_symmetric_key(&self, alias: &KeyAlias) -> Result<SymmetricKeyHandle, KeyStoreError> {
        self.load(alias)?.symmetric_handle(alias)
    }

    fn get_key_pair(&self, alias: &KeyAlias) -> Result<KeyPairHandle, KeyStoreError> {
        self.load(alias)?.key_pair_handle(alias)
    }

    fn delete_entry(&self, alias: &KeyAlias) -> Result<bool, KeyStoreError> {
        Ok(self.entries()?.remove(alias).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_generation_keeps_first_key() {
        let store = MemoryKeyStore::new();
        let alias = KeyAlias::from("token");
        store
            .generate_symmetric_key(&alias, &SymmetricKeyParams::default())
            .unwrap();
        let sealed = store
            .get_symmetric_key(&alias)
            .unwrap()
            .seal(b"fixed_direct", b"payload")
            .unwrap();

        store
            .generate_symmetric_key(&alias, &SymmetricKeyParams::default())
            .unwrap();
        assert_eq!(store.generated_count(), 1);
        assert_eq!(
            store
                .get_symmetric_key(&alias)
                .unwrap()
                .open(b"fixed_direct", &sealed)
                .unwrap(),
            b"payload"
        );
    }

    #[test]
    fn concurrent_generation_creates_one_entry() {
        let store = Arc::new(MemoryKeyStore::new());
        let alias = KeyAlias::from("shared");
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let alias = alias.clone();
                thread::spawn(move || {
                    store
                        .generate_symmetric_key(&alias, &SymmetricKeyParams::default())
                        .unwrap()
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(store.generated_count(), 1);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn missing_alias_is_not_found() {
        let store = MemoryKeyStore::new();
        let err = store.get_key_pair(&KeyAlias::from("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
        assert!(!store.delete_entry(&KeyAlias::from("nope")).unwrap());
    }

    #[test]
    fn injected_failures() {
        let alias = KeyAlias::from("x");

        let offline = MemoryKeyStore::unavailable();
        assert_eq!(
            offline.contains_alias(&alias).unwrap_err().kind(),
            ErrorKind::KeyStoreUnavailable
        );
        assert_eq!(
            offline
                .generate_symmetric_key(&alias, &SymmetricKeyParams::default())
                .unwrap_err()
                .kind(),
            ErrorKind::KeyStoreUnavailable
        );

        let broken = MemoryKeyStore::failing_generation();
        assert!(!broken.contains_alias(&alias).unwrap());
        assert_eq!(
            broken
                .generate_symmetric_key(&alias, &SymmetricKeyParams::default())
                .unwrap_err()
                .kind(),
            ErrorKind::KeyGenerationFailed
        );
        assert!(broken.is_empty().unwrap());

        // an offline store cannot vouch for being empty
        assert_eq!(
            offline.is_empty().unwrap_err().kind(),
            ErrorKind::KeyStoreUnavailable
        );
    }
}
