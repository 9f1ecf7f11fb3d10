//! TPM sealing of a persistent store's master key.
//!
//! A primary key is created in the owner hierarchy (AES-128-CFB when the TPM
//! supports it, RSA-2048 otherwise) and a child key of the same family wraps
//! the master key. Only the child's public/private blobs and the wrapped key
//! are kept; the primary is recreated from its template on every unseal.

use bincode::{Decode, Encode};
use secrecy::ExposeSecret;
use tracing::{debug, error, info, instrument, trace};
use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::constants::{AlgorithmIdentifier, CapabilityType};
use tss_esapi::handles::KeyHandle;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm, SymmetricMode};
use tss_esapi::interface_types::key_bits::{AesKeyBits, RsaKeyBits};
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{
    CapabilityData, Data, Digest, InitialValue, MaxBuffer, Private, Public, PublicBuilder,
    PublicKeyRsa, PublicRsaParametersBuilder, RsaDecryptionScheme, RsaExponent, RsaScheme,
    SymmetricCipherParameters, SymmetricDefinitionObject,
};
use tss_esapi::tcti_ldr::TabrmdConfig;
use tss_esapi::traits::{Marshall, UnMarshall};
use tss_esapi::{Context, TctiNameConf, WrapperErrorKind};
use zeroize::Zeroizing;

use crate::crypt::MasterKey;
use crate::error::KeyStoreError;

const RSA_KEY_BITS: u16 = 2048;
/// Conservative PKCS#1 v1.5 payload limit for a 2048-bit TPM key.
const RSA_MAX_PAYLOAD: usize = 190;
const AES_BLOCK_SIZE: usize = 16;

fn wrapper_error(kind: WrapperErrorKind) -> tss_esapi::Error {
    tss_esapi::Error::WrapperError(kind)
}

/// TCTI from `TPM2TOOLS_TCTI` (or `TCTI`), falling back to the tabrmd broker.
pub fn default_tcti() -> TctiNameConf {
    TctiNameConf::from_environment_variable().unwrap_or(TctiNameConf::Tabrmd(TabrmdConfig::default()))
}

/// How a master key was wrapped, and what unwrapping needs besides the key.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum TpmEncryptionMeta {
    Aes128Cfb { iv: Vec<u8> },
    Rsa2048,
}

/// A master key wrapped by a TPM-resident child key.
#[derive(Encode, Decode, Debug, Clone)]
pub struct SealedMasterKey {
    meta: TpmEncryptionMeta,
    /// Marshalled TPM2B_PUBLIC of the wrapping key
    public_blob: Vec<u8>,
    /// TPM2B_PRIVATE of the wrapping key, only loadable by this TPM
    private_blob: Vec<u8>,
    encrypted_key: Vec<u8>,
}

impl SealedMasterKey {
    #[instrument(level = "debug", skip_all)]
    pub fn seal(master_key: &MasterKey, ctx: Context) -> Result<Self, tss_esapi::Error> {
        let mut wrapper = TpmKeyWrapper::new_with_primary_auto(ctx)?;
        let (public, private) = wrapper.generate_child_key()?;
        let (encrypted_key, meta) = wrapper.wrap(master_key.key().expose_secret())?;

        Ok(Self {
            meta,
            public_blob: public.marshall()?,
            private_blob: private.value().to_vec(),
            encrypted_key,
        })
    }

    #[instrument(level = "debug", skip_all)]
    pub fn unseal(&self, ctx: Context) -> Result<MasterKey, KeyStoreError> {
        let mut wrapper = TpmKeyWrapper::new_with_primary_auto(ctx)?;
        let public = Public::unmarshall(&self.public_blob)?;
        let private = Private::try_from(self.private_blob.clone())?;
        wrapper.load_child_key(public, private)?;

        let key = wrapper.unwrap(&self.encrypted_key, &self.meta)?;
        MasterKey::from_slice(&key).ok_or_else(|| {
            KeyStoreError::Unavailable("TPM unsealed a master key of the wrong length".to_string())
        })
    }
}

/// Whether the TPM implements AES and CFB, which the symmetric wrapping needs.
pub fn is_aes_supported(ctx: &mut Context) -> Result<bool, tss_esapi::Error> {
    let (data, _) = ctx.get_capability(CapabilityType::Algorithms, 0, 50)?;

    if let CapabilityData::Algorithms(algorithms) = data {
        let has = |wanted| {
            algorithms
                .iter()
                .any(|algo| algo.algorithm_identifier() == wanted)
        };
        Ok(has(AlgorithmIdentifier::Aes) && has(AlgorithmIdentifier::Cfb))
    } else {
        error!("Unexpected capability data type: {:?}", data);
        Err(wrapper_error(WrapperErrorKind::UnsupportedParam))
    }
}

/// A TPM context with a primary key and, once generated or loaded, a child
/// key that does the wrapping.
pub struct TpmKeyWrapper {
    ctx: Context,
    primary: KeyHandle,
    child: Option<KeyHandle>,
}

impl TpmKeyWrapper {
    /// AES primary if the TPM supports it, RSA otherwise.
    pub fn new_with_primary_auto(mut ctx: Context) -> Result<Self, tss_esapi::Error> {
        match is_aes_supported(&mut ctx) {
            Ok(true) => {
                info!("Creating AES primary key in TPM");
                Self::create_with_aes_primary(ctx)
            }
            _ => {
                info!("Creating RSA primary key in TPM");
                Self::create_with_rsa_primary(ctx)
            }
        }
    }

    fn child(&self) -> Result<KeyHandle, tss_esapi::Error> {
        self.child.ok_or_else(|| {
            error!("No child key loaded for wrapping");
            wrapper_error(WrapperErrorKind::ParamsMissing)
        })
    }

    fn key_type(&mut self, key: KeyHandle) -> Result<PublicAlgorithm, tss_esapi::Error> {
        let (public, _, _) = self
            .ctx
            .execute_with_nullauth_session(|ctx| ctx.read_public(key))?;
        Ok(match public {
            Public::Rsa { .. } => PublicAlgorithm::Rsa,
            Public::SymCipher { .. } => PublicAlgorithm::SymCipher,
            Public::Ecc { .. } => PublicAlgorithm::Ecc,
            Public::KeyedHash { .. } => PublicAlgorithm::KeyedHash,
        })
    }

    /// Creates and loads a child key of the same family as the primary.
    pub fn generate_child_key(&mut self) -> Result<(Public, Private), tss_esapi::Error> {
        let template = match self.key_type(self.primary)? {
            PublicAlgorithm::Rsa => rsa_child_template()?,
            PublicAlgorithm::SymCipher => aes_child_template()?,
            other => {
                error!("Unsupported primary key algorithm: {:?}", other);
                return Err(wrapper_error(WrapperErrorKind::UnsupportedParam));
            }
        };

        let primary = self.primary;
        let created = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.create(primary, template.clone(), None, None, None, None)
        })?;
        debug!(
            private_len = created.out_private.value().len(),
            "Child key created in TPM"
        );

        self.load_child_key(created.out_public.clone(), created.out_private.clone())?;
        Ok((created.out_public, created.out_private))
    }

    pub fn load_child_key(&mut self, public: Public, private: Private) -> Result<(), tss_esapi::Error> {
        let primary = self.primary;
        let handle = self
            .ctx
            .execute_with_nullauth_session(|ctx| ctx.load(primary, private, public))?;
        self.child = Some(handle);
        Ok(())
    }

    pub fn wrap(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, TpmEncryptionMeta), tss_esapi::Error> {
        let child = self.child()?;
        match self.key_type(child)? {
            PublicAlgorithm::Rsa => Ok((self.rsa_encrypt(child, plaintext)?, TpmEncryptionMeta::Rsa2048)),
            PublicAlgorithm::SymCipher => {
                let (ciphertext, iv) = self.aes_encrypt(child, plaintext)?;
                Ok((
                    ciphertext,
                    TpmEncryptionMeta::Aes128Cfb {
                        iv: iv.value().to_vec(),
                    },
                ))
            }
            other => {
                error!("Unsupported child key algorithm: {:?}", other);
                Err(wrapper_error(WrapperErrorKind::UnsupportedParam))
            }
        }
    }

    pub fn unwrap(
        &mut self,
        ciphertext: &[u8],
        meta: &TpmEncryptionMeta,
    ) -> Result<Zeroizing<Vec<u8>>, tss_esapi::Error> {
        let child = self.child()?;
        match meta {
            TpmEncryptionMeta::Rsa2048 => self.rsa_decrypt(child, ciphertext),
            TpmEncryptionMeta::Aes128Cfb { iv } => {
                let iv = InitialValue::try_from(iv.clone())?;
                self.aes_decrypt(child, ciphertext, iv)
            }
        }
    }

    fn rsa_encrypt(&mut self, key: KeyHandle, plaintext: &[u8]) -> Result<Vec<u8>, tss_esapi::Error> {
        if plaintext.len() > RSA_MAX_PAYLOAD {
            debug!(len = plaintext.len(), "Payload too large for RSA wrapping");
            return Err(wrapper_error(WrapperErrorKind::WrongParamSize));
        }
        let message = PublicKeyRsa::try_from(plaintext.to_vec())?;
        let encrypted = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.rsa_encrypt(key, message, RsaDecryptionScheme::RsaEs, Data::default())
        })?;
        Ok(encrypted.value().to_vec())
    }

    fn rsa_decrypt(
        &mut self,
        key: KeyHandle,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, tss_esapi::Error> {
        let cipher_text = PublicKeyRsa::try_from(ciphertext.to_vec())?;
        let decrypted = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.rsa_decrypt(key, cipher_text, RsaDecryptionScheme::RsaEs, Data::default())
        })?;
        Ok(Zeroizing::new(decrypted.value().to_vec()))
    }

    /// AES-CFB encrypt under a fresh IV drawn from the TPM RNG.
    fn aes_encrypt(
        &mut self,
        key: KeyHandle,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, InitialValue), tss_esapi::Error> {
        let iv = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.get_random(InitialValue::MAX_SIZE).and_then(|random| {
                InitialValue::try_from(random.to_vec())
                    .map_err(|_| wrapper_error(WrapperErrorKind::InvalidParam))
            })
        })?;

        let data = MaxBuffer::try_from(pkcs7_pad(plaintext).to_vec())?;
        let (encrypted, _) = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.encrypt_decrypt_2(key, false, SymmetricMode::Cfb, data.clone(), iv.clone())
        })?;
        Ok((encrypted.to_vec(), iv))
    }

    fn aes_decrypt(
        &mut self,
        key: KeyHandle,
        ciphertext: &[u8],
        iv: InitialValue,
    ) -> Result<Zeroizing<Vec<u8>>, tss_esapi::Error> {
        trace!(len = ciphertext.len(), "Decrypting with AES child key");
        let data = MaxBuffer::try_from(ciphertext.to_vec())?;
        let (decrypted, _) = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.encrypt_decrypt_2(key, true, SymmetricMode::Cfb, data.clone(), iv)
        })?;
        let padded = Zeroizing::new(decrypted.to_vec());
        pkcs7_unpad(&padded)
    }

    /// Restricted AES-128-CFB storage primary.
    #[instrument(level = "debug", skip(ctx))]
    pub fn create_with_aes_primary(mut ctx: Context) -> Result<Self, tss_esapi::Error> {
        let attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_decrypt(true)
            .with_restricted(true)
            .build()?;

        let template = PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::SymCipher)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(attributes)
            .with_symmetric_cipher_parameters(SymmetricCipherParameters::new(
                SymmetricDefinitionObject::AES_128_CFB,
            ))
            .with_symmetric_cipher_unique_identifier(Digest::default())
            .build()?;

        Self::create_primary(&mut ctx, template).map(|primary| Self {
            ctx,
            primary,
            child: None,
        })
    }

    /// Restricted RSA-2048 storage primary.
    #[instrument(level = "debug", skip(ctx))]
    pub fn create_with_rsa_primary(mut ctx: Context) -> Result<Self, tss_esapi::Error> {
        let attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_restricted(true)
            .with_decrypt(true)
            .build()?;

        let rsa_params = PublicRsaParametersBuilder::new_restricted_decryption_key(
            SymmetricDefinitionObject::AES_128_CFB,
            RsaKeyBits::try_from(RSA_KEY_BITS)?,
            RsaExponent::default(),
        )
        .build()?;

        let template = PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::Rsa)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(attributes)
            .with_rsa_parameters(rsa_params)
            .with_rsa_unique_identifier(PublicKeyRsa::default())
            .build()?;

        Self::create_primary(&mut ctx, template).map(|primary| Self {
            ctx,
            primary,
            child: None,
        })
    }

    fn create_primary(ctx: &mut Context, template: Public) -> Result<KeyHandle, tss_esapi::Error> {
        trace!(?template, "Creating primary key");
        let result = ctx.execute_with_nullauth_session(|ctx| {
            ctx.create_primary(Hierarchy::Owner, template, None, None, None, None)
        })?;
        Ok(result.key_handle)
    }
}

/// Unrestricted RSA decryption key; the NULL scheme lets each call pick RSAES.
fn rsa_child_template() -> Result<Public, tss_esapi::Error> {
    let rsa_params = PublicRsaParametersBuilder::new()
        .with_scheme(RsaScheme::Null)
        .with_key_bits(RsaKeyBits::try_from(RSA_KEY_BITS)?)
        .with_exponent(RsaExponent::default())
        .with_symmetric(SymmetricDefinitionObject::Null)
        .with_is_signing_key(false)
        .with_is_decryption_key(true)
        .with_restricted(false)
        .build()?;

    let attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_decrypt(true)
        .build()?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attributes)
        .with_rsa_parameters(rsa_params)
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
}

/// Unrestricted AES-128-CFB key. Not `st_clear`: the blobs must stay loadable
/// after a TPM restart.
fn aes_child_template() -> Result<Public, tss_esapi::Error> {
    let attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_sign_encrypt(true)
        .with_decrypt(true)
        .with_restricted(false)
        .build()?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::SymCipher)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attributes)
        .with_symmetric_cipher_parameters(SymmetricCipherParameters::new(
            SymmetricDefinitionObject::Aes {
                key_bits: AesKeyBits::Aes128,
                mode: SymmetricMode::Cfb,
            },
        ))
        .with_symmetric_cipher_unique_identifier(Digest::default())
        .build()
}

fn pkcs7_pad(data: &[u8]) -> Zeroizing<Vec<u8>> {
    let pad = AES_BLOCK_SIZE - (data.len() % AES_BLOCK_SIZE);
    let mut padded = Zeroizing::new(data.to_vec());
    padded.resize(data.len() + pad, pad as u8);
    padded
}

fn pkcs7_unpad(data: &[u8]) -> Result<Zeroizing<Vec<u8>>, tss_esapi::Error> {
    let invalid = || wrapper_error(WrapperErrorKind::InvalidParam);
    let pad = usize::from(*data.last().ok_or_else(invalid)?);
    if pad == 0 || pad > AES_BLOCK_SIZE || pad > data.len() {
        return Err(invalid());
    }
    let (body, padding) = data.split_at(data.len() - pad);
    if padding.iter().any(|&b| usize::from(b) != pad) {
        return Err(invalid());
    }
    Ok(Zeroizing::new(body.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MasterKeyProtection, SledKeyStore};
    use crate::keystore::{KeyAlias, KeyStoreAdapter};
    use crate::config::SymmetricKeyParams;
    use serial_test::serial;
    use tracing_test::traced_test;

    #[test]
    fn padding_round_trips_on_block_boundaries() {
        for len in [0usize, 1, 15, 16, 17, 32] {
            let data = vec![0xAB; len];
            let padded = pkcs7_pad(&data);
            assert_eq!(padded.len() % AES_BLOCK_SIZE, 0);
            assert!(padded.len() > len);
            assert_eq!(pkcs7_unpad(&padded).unwrap().as_slice(), data.as_slice());
        }
    }

    #[test]
    fn malformed_padding_is_rejected() {
        assert!(pkcs7_unpad(&[]).is_err());
        assert!(pkcs7_unpad(&[1, 2, 3, 0]).is_err());
        assert!(pkcs7_unpad(&[5, 5, 4, 4]).is_err());
        assert!(pkcs7_unpad(&[17; 16]).is_err());
    }

    #[test]
    #[serial]
    #[traced_test]
    #[ignore = "needs a TPM or swtpm reachable through TPM2TOOLS_TCTI"]
    fn master_key_seals_and_unseals() {
        let master_key = MasterKey::generate();
        let sealed = SealedMasterKey::seal(&master_key, Context::new(default_tcti()).unwrap())
            .expect("seal master key");
        let unsealed = sealed
            .unseal(Context::new(default_tcti()).unwrap())
            .expect("unseal master key");
        assert_eq!(
            unsealed.key().expose_secret(),
            master_key.key().expose_secret()
        );
    }

    #[test]
    #[serial]
    #[traced_test]
    #[ignore = "needs a TPM or swtpm reachable through TPM2TOOLS_TCTI"]
    fn tpm_protected_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let alias = KeyAlias::from("token");
        let sealed = {
            let store =
                SledKeyStore::open(dir.path(), "tpm", MasterKeyProtection::Tpm(default_tcti()))
                    .unwrap();
            store
                .generate_symmetric_key(&alias, &SymmetricKeyParams::default())
                .unwrap();
            store
                .get_symmetric_key(&alias)
                .unwrap()
                .seal(b"fixed_direct", b"across restarts")
                .unwrap()
        };

        let store =
            SledKeyStore::open(dir.path(), "tpm", MasterKeyProtection::Tpm(default_tcti()))
                .unwrap();
        let opened = store
            .get_symmetric_key(&alias)
            .unwrap()
            .open(b"fixed_direct", &sealed)
            .unwrap();
        assert_eq!(opened, b"across restarts");
    }
}
