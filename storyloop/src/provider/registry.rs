//! Name → backend lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::io::config::Config;
use crate::provider::claude::ClaudeProvider;
use crate::provider::codex::CodexProvider;
use crate::provider::gemini::GeminiProvider;
use crate::provider::{Provider, ProviderError};

/// Builds a backend from the resolved configuration.
pub type ProviderBuilder = fn(&Config) -> Arc<dyn Provider>;

/// Maps lowercase backend names to their builders.
#[derive(Clone)]
pub struct Registry {
    builders: BTreeMap<String, ProviderBuilder>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("codex", build_codex);
        registry.register("claude", build_claude);
        registry.register("gemini", build_gemini);
        registry
    }
}

fn build_codex(cfg: &Config) -> Arc<dyn Provider> {
    Arc::new(CodexProvider::new(cfg.providers.codex.clone()))
}

fn build_claude(cfg: &Config) -> Arc<dyn Provider> {
    Arc::new(ClaudeProvider::new(cfg.providers.claude.clone()))
}

fn build_gemini(cfg: &Config) -> Arc<dyn Provider> {
    Arc::new(GeminiProvider::new(cfg.providers.gemini.clone()))
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Register (or replace) a backend.
    pub fn register(&mut self, name: &str, builder: ProviderBuilder) {
        self.builders.insert(normalize(name), builder);
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }

    /// Build the backend called `name`, or the configured default when blank.
    pub fn resolve(&self, name: &str, cfg: &Config) -> Result<Arc<dyn Provider>, ProviderError> {
        let mut key = normalize(name);
        if key.is_empty() {
            key = normalize(&cfg.provider.default);
        }
        let builder = self
            .builders
            .get(&key)
            .ok_or_else(|| ProviderError::unknown_provider(&key, &self.names()))?;
        debug!(provider = %key, "resolved provider");
        Ok(builder(cfg))
    }
}
