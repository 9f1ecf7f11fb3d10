use crate::keystore::KeyAlias;

/// Flat failure taxonomy shared by the key store and the cipher strategies.
///
/// Callers that only need to tell "key missing" apart from "ciphertext corrupt"
/// can match on this instead of the structured errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyStoreUnavailable,
    KeyGenerationFailed,
    KeyNotFound,
    KeyUnrecoverable,
    EncodingError,
    AuthenticationFailed,
    UnderlyingCipherError,
}

/// Errors reported by a [`KeyStoreAdapter`](crate::keystore::KeyStoreAdapter).
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum KeyStoreError {
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to generate key for alias {alias}: {reason}")]
    GenerationFailed { alias: KeyAlias, reason: String },

    #[error("no key stored under alias {0}")]
    NotFound(KeyAlias),

    #[error("key stored under alias {alias} is unrecoverable: {reason}")]
    Unrecoverable { alias: KeyAlias, reason: String },
}

impl KeyStoreError {
    pub(crate) fn generation_failed(alias: &KeyAlias, reason: impl Into<String>) -> Self {
        Self::GenerationFailed {
            alias: alias.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unrecoverable(alias: &KeyAlias, reason: impl Into<String>) -> Self {
        Self::Unrecoverable {
            alias: alias.clone(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::KeyStoreUnavailable,
            Self::GenerationFailed { .. } => ErrorKind::KeyGenerationFailed,
            Self::NotFound(_) => ErrorKind::KeyNotFound,
            Self::Unrecoverable { .. } => ErrorKind::KeyUnrecoverable,
        }
    }
}

impl From<sled::Error> for KeyStoreError {
    fn from(e: sled::Error) -> Self {
        Self::Unavailable(format!("sled: {e}"))
    }
}

#[cfg(feature = "tpm")]
impl From<tss_esapi::Error> for KeyStoreError {
    fn from(e: tss_esapi::Error) -> Self {
        Self::Unavailable(format!("tpm: {e}"))
    }
}

/// Errors from a single encrypt or decrypt call. Always terminal for that call.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum CryptoError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("key unavailable: {0}")]
    KeyUnavailable(#[from] KeyStoreError),

    #[error("authentication failed: ciphertext or key does not match")]
    AuthenticationFailed,

    #[error("cipher failure: {0}")]
    UnderlyingCipher(String),
}

impl CryptoError {
    /// The taxonomy entry for this error. Key store failures keep their own kind
    /// so that a missing key is distinguishable from a corrupt ciphertext.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encoding(_) => ErrorKind::EncodingError,
            Self::KeyUnavailable(inner) => inner.kind(),
            Self::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Self::UnderlyingCipher(_) => ErrorKind::UnderlyingCipherError,
        }
    }
}
