//! Capability-tiered at-rest encryption for short string secrets.
//!
//! An [`EncryptionService`] is bound to one alias. When it is built it looks
//! at what the host's key store can do and picks a [`Tier`]:
//!
//! | capabilities           | tier                          | scheme                        |
//! |------------------------|-------------------------------|-------------------------------|
//! | AEAD keys + key pairs  | [`Tier::HardwareSymmetric`]   | AES-256-GCM, stored key       |
//! | key pairs only         | [`Tier::HardwareAsymmetric`]  | RSA PKCS#1 v1.5, stored pair  |
//! | nothing                | [`Tier::SoftwareDerived`]     | AES-128-ECB, alias-derived key|
//!
//! Output is base64 text. There is no tier tag in it, so a blob can only be
//! read back by a service that resolves to the same tier and alias.
//!
//! # Known weaknesses
//!
//! These are kept so that blobs written by existing clients stay readable.
//!
//! - The symmetric tier uses the fixed nonce [`cipher::FIXED_NONCE`] for every
//!   message. Equal plaintexts give equal ciphertexts and GCM's guarantees
//!   across messages do not hold.
//! - The software tier derives its key from the alias alone. Anyone who knows
//!   the alias can decrypt, and ECB reveals repeated blocks.
//! - Only the symmetric tier detects tampering.
//!
//! # Key stores
//!
//! The crate never calls a platform key store directly; it goes through
//! [`KeyStoreAdapter`]. [`MemoryKeyStore`] keeps keys in process memory and
//! [`SledKeyStore`] persists them, sealed under a [`MasterKey`] that can
//! itself be sealed by a TPM with the `tpm` feature.
//!
//! Diagnostics go through `tracing`. Installing a subscriber is up to the
//! application.

pub mod capability;
pub mod cipher;
pub mod config;
pub mod context;
pub mod crypt;
pub mod encoding;
pub mod error;
pub mod key_manager;
pub mod keystore;
pub mod kv;
pub mod service;
#[cfg(feature = "tpm")]
pub mod tpm;

pub use capability::{PlatformCapabilities, Tier, resolve_tier};
pub use config::{KeyPairParams, ServiceConfig, SymmetricKeyParams};
pub use context::PlatformContext;
pub use crypt::MasterKey;
pub use encoding::Base64Layout;
pub use error::{CryptoError, ErrorKind, KeyStoreError};
pub use key_manager::KeyManager;
pub use keystore::{KeyAlias, KeyStoreAdapter, MemoryKeyStore};
pub use kv::{MasterKeyProtection, SledKeyStore};
pub use service::EncryptionService;
