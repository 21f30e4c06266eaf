//! Provider id to connector map, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::traits::CredentialConnector;

#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn CredentialConnector>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its provider id, replacing any previous one.
    #[must_use]
    pub fn with(mut self, connector: Arc<dyn CredentialConnector>) -> Self {
        self.register(connector);
        self
    }

    pub fn register(&mut self, connector: Arc<dyn CredentialConnector>) {
        let id = connector.provider_id().to_ascii_lowercase();
        tracing::debug!(provider = %id, "Registered credential connector");
        self.connectors.insert(id, connector);
    }

    /// Lookup is case-insensitive.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<Arc<dyn CredentialConnector>> {
        self.connectors.get(&provider.to_ascii_lowercase()).cloned()
    }

    #[must_use]
    pub fn contains(&self, provider: &str) -> bool {
        self.connectors.contains_key(&provider.to_ascii_lowercase())
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("providers", &self.providers().collect::<Vec<_>>())
            .finish()
    }
}
