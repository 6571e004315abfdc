//! Provider registry for runtime provider lookup.
//!
//! An id-indexed registry of boxed providers, wiring configured provider
//! ids to concrete implementations.

use std::collections::HashMap;

use super::box_provider::BoxModelProvider;

/// Registry of available providers, indexed by id.
pub struct ProviderRegistry {
    providers: HashMap<String, BoxModelProvider>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider under its own id.
    ///
    /// If a provider with this id already exists, it is replaced.
    pub fn register(&mut self, provider: BoxModelProvider) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<&BoxModelProvider> {
        self.providers.get(id)
    }

    /// List all registered provider ids.
    pub fn list_ids(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
