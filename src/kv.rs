//! Persistent key store on top of sled.
//!
//! Key entries live under `<namespace>/key/<alias>`. Each one is a
//! bincode-encoded [`KeyRecord`] sealed with a [`SessionKey`] derived from the
//! store's [`MasterKey`], using the entry path as both HKDF context and AEAD
//! associated data. With TPM protection the master key itself is stored,
//! TPM-sealed, under `<namespace>/sealed_master_key`.

use bincode::{Decode, Encode};
use secrecy::{ExposeSecret, SecretSlice};
use sled::Db;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::capability::PlatformCapabilities;
use crate::config::{KeyPairParams, SymmetricKeyParams};
use crate::crypt::{MasterKey, SessionKey};
use crate::error::KeyStoreError;
use crate::keystore::{
    CertificateInfo, GCM_NONCE_LEN, KeyAlias, KeyPairHandle, KeyStoreAdapter, StoredKey,
    SymmetricKeyHandle,
};

/// How the store obtains its master key.
pub enum MasterKeyProtection {
    /// The caller supplies the master key on every open; it is never written
    /// to the database.
    Provided(MasterKey),
    /// A master key is generated on first open, sealed by the TPM reachable
    /// over this TCTI, and stored in the database.
    #[cfg(feature = "tpm")]
    Tpm(tss_esapi::TctiNameConf),
}

/// Plaintext form of one entry, before sealing.
#[derive(Encode, Decode)]
enum KeyRecord {
    Symmetric {
        key: Vec<u8>,
        randomized_encryption_required: bool,
    },
    KeyPair {
        private_der: Vec<u8>,
        subject: String,
        serial: u64,
        not_before_secs: u64,
        not_after_secs: u64,
    },
}

#[derive(Encode, Decode)]
struct SealedEntry {
    nonce: [u8; GCM_NONCE_LEN],
    ciphertext: Vec<u8>,
}

fn to_unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

impl KeyRecord {
    fn from_stored(stored: &StoredKey) -> Self {
        match stored {
            StoredKey::Symmetric {
                key,
                randomized_encryption_required,
            } => Self::Symmetric {
                key: key.expose_secret().to_vec(),
                randomized_encryption_required: *randomized_encryption_required,
            },
            StoredKey::KeyPair {
                private_der,
                certificate,
            } => Self::KeyPair {
                private_der: private_der.expose_secret().to_vec(),
                subject: certificate.subject.clone(),
                serial: certificate.serial,
                not_before_secs: to_unix_secs(certificate.not_before),
                not_after_secs: to_unix_secs(certificate.not_after),
            },
        }
    }

    fn into_stored(self) -> StoredKey {
        match self {
            Self::Symmetric {
                key,
                randomized_encryption_required,
            } => StoredKey::Symmetric {
                key: SecretSlice::new(key.into_boxed_slice()),
                randomized_encryption_required,
            },
            Self::KeyPair {
                private_der,
                subject,
                serial,
                not_before_secs,
                not_after_secs,
            } => StoredKey::KeyPair {
                private_der: SecretSlice::new(private_der.into_boxed_slice()),
                certificate: CertificateInfo {
                    subject,
                    serial,
                    not_before: from_unix_secs(not_before_secs),
                    not_after: from_unix_secs(not_after_secs),
                },
            },
        }
    }
}

/// A [`KeyStoreAdapter`] persisting sealed key material in a sled database.
///
/// Several stores can share one database under different namespaces.
pub struct SledKeyStore {
    db: Db,
    namespace: String,
    master_key: MasterKey,
}

impl SledKeyStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        namespace: &str,
        protection: MasterKeyProtection,
    ) -> Result<Self, KeyStoreError> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db, namespace, protection)
    }

    /// Uses an already opened database.
    #[instrument(level = "debug", skip(db, protection))]
    pub fn from_db(
        db: Db,
        namespace: &str,
        protection: MasterKeyProtection,
    ) -> Result<Self, KeyStoreError> {
        let master_key = match protection {
            MasterKeyProtection::Provided(master_key) => master_key,
            #[cfg(feature = "tpm")]
            MasterKeyProtection::Tpm(tcti) => {
                load_or_seal_master_key(&db, &sealed_master_key_path(namespace), tcti)?
            }
        };

        Ok(Self {
            db,
            namespace: namespace.to_string(),
            master_key,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns a handle on the underlying sled database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    fn entry_path(&self, alias: &KeyAlias) -> String {
        format!(
            "{namespace}/key/{alias}",
            namespace = self.namespace,
            alias = alias
        )
    }

    fn seal(&self, alias: &KeyAlias, stored: &StoredKey) -> Result<Vec<u8>, KeyStoreError> {
        let path = self.entry_path(alias);
        let record = Zeroizing::new(
            bincode::encode_to_vec(KeyRecord::from_stored(stored), bincode::config::standard())
                .map_err(|e| KeyStoreError::generation_failed(alias, format!("encode: {e}")))?,
        );
        let (nonce, ciphertext) = SessionKey::derive(&self.master_key, path.as_bytes())
            .seal(&record, path.as_bytes())
            .map_err(|_| KeyStoreError::generation_failed(alias, "sealing entry failed"))?;

        bincode::encode_to_vec(SealedEntry { nonce, ciphertext }, bincode::config::standard())
            .map_err(|e| KeyStoreError::generation_failed(alias, format!("encode: {e}")))
    }

    fn unseal(&self, alias: &KeyAlias, bytes: &[u8]) -> Result<StoredKey, KeyStoreError> {
        let path = self.entry_path(alias);
        let (entry, _): (SealedEntry, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| KeyStoreError::unrecoverable(alias, format!("corrupt entry: {e}")))?;
        let record = SessionKey::derive(&self.master_key, path.as_bytes())
            .open(&entry.nonce, &entry.ciphertext, path.as_bytes())
            .map_err(|_| {
                KeyStoreError::unrecoverable(alias, "entry does not unseal under this master key")
            })?;
        let (record, _): (KeyRecord, usize) =
            bincode::decode_from_slice(&record, bincode::config::standard())
                .map_err(|e| KeyStoreError::unrecoverable(alias, format!("corrupt record: {e}")))?;
        Ok(record.into_stored())
    }

    /// Atomic insert-if-absent; a concurrent winner's entry is kept.
    fn insert_if_absent(&self, alias: &KeyAlias, stored: &StoredKey) -> Result<(), KeyStoreError> {
        let sealed = self.seal(alias, stored)?;
        let swapped =
            self.db
                .compare_and_swap(self.entry_path(alias), None as Option<&[u8]>, Some(sealed))?;
        match swapped {
            Ok(()) => {
                self.db.flush()?;
                info!(alias = %alias, kind = stored.kind_name(), "Stored new key");
            }
            Err(_) => {
                debug!(alias = %alias, "Alias already populated, keeping existing entry");
            }
        }
        Ok(())
    }

    fn load(&self, alias: &KeyAlias) -> Result<StoredKey, KeyStoreError> {
        match self.db.get(self.entry_path(alias))? {
            Some(bytes) => self.unseal(alias, &bytes),
            None => Err(KeyStoreError::NotFound(alias.clone())),
        }
    }
}

impl KeyStoreAdapter for SledKeyStore {
    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities::all()
    }

    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool, KeyStoreError> {
        Ok(self.db.contains_key(self.entry_path(alias))?)
    }

    #[instrument(level = "debug", skip(self, params), fields(alias = %alias))]
    fn generate_symmetric_key(
        &self,
        alias: &KeyAlias,
        params: &SymmetricKeyParams,
    ) -> Result<(), KeyStoreError> {
        let stored = StoredKey::generate_symmetric(alias, params)?;
        self.insert_if_absent(alias, &stored)
    }

    #[instrument(level = "debug", skip(self, params), fields(alias = %alias))]
    fn generate_key_pair(
        &self,
        alias: &KeyAlias,
        params: &KeyPairParams,
    ) -> Result<(), KeyStoreError> {
        let stored = StoredKey::generate_key_pair(alias, params)?;
        self.insert_if_absent(alias, &stored)
    }

    fn get_symmetric_key(&self, alias: &KeyAlias) -> Result<SymmetricKeyHandle, KeyStoreError> {
        self.load(alias)?.symmetric_handle(alias)
    }

    fn get_key_pair(&self, alias: &KeyAlias) -> Result<KeyPairHandle, KeyStoreError> {
        self.load(alias)?.key_pair_handle(alias)
    }

    fn delete_entry(&self, alias: &KeyAlias) -> Result<bool, KeyStoreError> {
        let removed = self.db.remove(self.entry_path(alias))?.is_some();
        self.db.flush()?;
        Ok(removed)
    }
}

#[cfg(feature = "tpm")]
fn sealed_master_key_path(namespace: &str) -> String {
    format!("{namespace}/sealed_master_key")
}

/// Unseals the stored master key, or generates, seals and stores one.
#[cfg(feature = "tpm")]
fn load_or_seal_master_key(
    db: &Db,
    path: &str,
    tcti: tss_esapi::TctiNameConf,
) -> Result<MasterKey, KeyStoreError> {
    use crate::tpm::SealedMasterKey;
    use tss_esapi::Context;

    let decode = |bytes: &[u8]| -> Result<SealedMasterKey, KeyStoreError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(sealed, _)| sealed)
            .map_err(|e| KeyStoreError::Unavailable(format!("corrupt sealed master key: {e}")))
    };

    if let Some(bytes) = db.get(path)? {
        debug!("Unsealing stored master key with the TPM");
        return decode(&bytes)?.unseal(Context::new(tcti)?);
    }

    let master_key = MasterKey::generate();
    let sealed = SealedMasterKey::seal(&master_key, Context::new(tcti.clone())?)?;
    let encoded = bincode::encode_to_vec(&sealed, bincode::config::standard())
        .map_err(|e| KeyStoreError::Unavailable(format!("encode sealed master key: {e}")))?;

    match db.compare_and_swap(path, None as Option<&[u8]>, Some(encoded))? {
        Ok(()) => {
            db.flush()?;
            info!("Sealed new master key with the TPM");
            Ok(master_key)
        }
        Err(existing) => {
            // another opener sealed first; use theirs
            let bytes = existing.current.ok_or_else(|| {
                KeyStoreError::Unavailable("sealed master key vanished".to_string())
            })?;
            decode(&bytes)?.unseal(Context::new(tcti)?)
        }
    }
}
