use std::sync::Arc;

use tiervault::{
    EncryptionService, MasterKey, MasterKeyProtection, MemoryKeyStore, PlatformCapabilities,
    PlatformContext, SledKeyStore,
};
use tracing_subscriber::EnvFilter;

/// # tiervault usage example
///
/// 1. Open a persistent key store backed by sled. The master key is supplied
///    by the caller here; with the `tpm` feature it can be sealed by a TPM
///    instead (`MasterKeyProtection::Tpm`).
/// 2. Build a service for one alias. It picks the strongest tier the store
///    supports and creates the key on first use.
/// 3. Encrypt and decrypt a string, then reopen the store and read it back.
/// 4. Model a host without secure storage and see the software tier chosen.
///
/// Run with `RUST_LOG=tiervault=debug` to see what happens underneath.
pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store_path = "tmp/tiervault";
    if std::path::Path::new(store_path).exists() {
        std::fs::remove_dir_all(store_path).expect("Failed to remove existing store");
    }

    // in a real application this comes from somewhere durable
    let master_key = MasterKey::generate();
    let open_store = || {
        SledKeyStore::open(
            store_path,
            "demo",
            MasterKeyProtection::Provided(master_key.clone()),
        )
        .expect("Failed to open key store")
    };

    let encrypted = {
        let context = PlatformContext::new(Arc::new(open_store()));
        let service = EncryptionService::new(context, "user_token");
        println!("Tier: {}", service.tier());

        let encrypted = service
            .encrypt_data("hello-world")
            .expect("Encryption failed");
        print!("Ciphertext:\n{encrypted}");
        encrypted
    };

    // same alias, same master key: the stored key is picked up again
    let service = EncryptionService::new(PlatformContext::new(Arc::new(open_store())), "user_token");
    let decrypted = service.decrypt_data(&encrypted).expect("Decryption failed");
    println!("Decrypted after reopen: {decrypted}");

    // an old host with no secure key storage at all
    let legacy = PlatformContext::new(Arc::new(MemoryKeyStore::new()))
        .with_capabilities(PlatformCapabilities::from_api_level(16));
    let service = EncryptionService::new(legacy, "user_token");
    println!(
        "Legacy tier: {} -> {}",
        service.tier(),
        service
            .encrypt_data("hello-world")
            .unwrap_or_else(|| "<failed>".to_string())
            .trim_end()
    );
}
