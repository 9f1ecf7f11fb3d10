use std::fmt;
use std::sync::Arc;

use crate::capability::PlatformCapabilities;
use crate::keystore::KeyStoreAdapter;

/// What the host gives a service: a key store and a description of what that
/// host can do.
///
/// Capabilities default to the store's own. Narrowing them models an older
/// host on top of a store that could do more.
#[derive(Clone)]
pub struct PlatformContext {
    store: Arc<dyn KeyStoreAdapter>,
    capabilities: PlatformCapabilities,
}

impl PlatformContext {
    pub fn new(store: Arc<dyn KeyStoreAdapter>) -> Self {
        let capabilities = store.capabilities();
        Self {
            store,
            capabilities,
        }
    }

    pub fn with_capabilities(mut self, capabilities: PlatformCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStoreAdapter> {
        &self.store
    }
}

impl fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformContext")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
