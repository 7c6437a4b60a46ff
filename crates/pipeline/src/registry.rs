//! Provider registry: resolves a job's requested provider to a ready-made
//! generator chain.
//!
//! Built once at startup from the registered generators, the fallback links
//! (`PROVIDER_FALLBACKS`) and a default provider per media kind, then shared
//! read-only by every dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use adcraft_core::generation::MediaKind;
use adcraft_providers::gemini::GeminiImageGenerator;
use adcraft_providers::openai::OpenAiImageGenerator;
use adcraft_providers::synthetic::{SyntheticImageGenerator, SyntheticVideoGenerator};
use adcraft_providers::veo::VeoVideoGenerator;
use adcraft_providers::Generator;

use crate::orchestrator::{FallbackGenerator, DEFAULT_CALL_TIMEOUT};

const ALL_KINDS: [MediaKind; 2] = [MediaKind::Image, MediaKind::Video];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider '{name}' produces {actual}, expected {expected}")]
    KindMismatch {
        name: String,
        expected: MediaKind,
        actual: MediaKind,
    },

    #[error("No default provider configured for {0}")]
    MissingDefault(MediaKind),

    #[error("Provider '{0}' has more than one fallback")]
    DuplicateFallback(String),

    #[error("Fallback chain starting at '{0}' contains a cycle")]
    Cycle(String),

    #[error("Invalid fallback entry '{0}'. Expected 'provider:fallback'")]
    InvalidFallbackEntry(String),
}

/// Parse `"a:b,c:d"` into `(from, to)` links. Blank entries are skipped.
pub fn parse_fallbacks(value: &str) -> Result<Vec<(String, String)>, RegistryError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (from, to) = entry
                .split_once(':')
                .map(|(f, t)| (f.trim(), t.trim()))
                .filter(|(f, t)| !f.is_empty() && !t.is_empty())
                .ok_or_else(|| RegistryError::InvalidFallbackEntry(entry.to_string()))?;
            Ok((from.to_string(), to.to_string()))
        })
        .collect()
}

/// Immutable name → chain lookup.
pub struct ProviderRegistry {
    chains: HashMap<String, Arc<dyn Generator>>,
    defaults: HashMap<MediaKind, String>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Whether `name` is registered for `kind`.
    pub fn contains(&self, kind: MediaKind, name: &str) -> bool {
        self.chains.get(name).is_some_and(|g| g.kind() == kind)
    }

    /// Default provider name for `kind`.
    pub fn default_for(&self, kind: MediaKind) -> &str {
        self.defaults.get(&kind).map(String::as_str).unwrap_or_default()
    }

    /// Resolve a requested provider to its generator chain.
    ///
    /// Never fails: an empty, unknown or kind-mismatched name degrades to
    /// the default for `kind` with a warning. Returns the chain and the
    /// resolved provider name.
    pub fn resolve(&self, kind: MediaKind, requested: &str) -> (Arc<dyn Generator>, String) {
        if let Some(chain) = self.chains.get(requested).filter(|g| g.kind() == kind) {
            return (Arc::clone(chain), requested.to_string());
        }

        let default = self.default_for(kind);
        tracing::warn!(
            requested,
            kind = %kind,
            default,
            "Requested provider unavailable, using default",
        );
        // `build` guarantees a registered default for every kind.
        let chain = &self.chains[default];
        (Arc::clone(chain), default.to_string())
    }

    /// Registered provider names for `kind`, sorted.
    pub fn names(&self, kind: MediaKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .chains
            .iter()
            .filter(|(_, g)| g.kind() == kind)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Collects generators, fallback links and defaults before validation.
pub struct RegistryBuilder {
    generators: HashMap<String, Arc<dyn Generator>>,
    fallbacks: Vec<(String, String)>,
    defaults: HashMap<MediaKind, String>,
    call_timeout: Duration,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            generators: HashMap::new(),
            fallbacks: Vec::new(),
            defaults: HashMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RegistryBuilder {
    pub fn register(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generators.insert(generator.name().to_string(), generator);
        self
    }

    /// Register every built-in provider. Remote providers without a key
    /// are still registered; they fail with a credential error and fall
    /// through to their fallback.
    pub fn with_builtin_generators(
        self,
        client: reqwest::Client,
        gemini_api_key: Option<String>,
        openai_api_key: Option<String>,
    ) -> Self {
        self.register(Arc::new(GeminiImageGenerator::new(
            client.clone(),
            gemini_api_key.clone(),
        )))
        .register(Arc::new(OpenAiImageGenerator::new(client.clone(), openai_api_key)))
        .register(Arc::new(VeoVideoGenerator::new(client, gemini_api_key)))
        .register(Arc::new(SyntheticImageGenerator))
        .register(Arc::new(SyntheticVideoGenerator))
    }

    pub fn fallback(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.fallbacks.push((from.into(), to.into()));
        self
    }

    pub fn fallbacks(mut self, links: impl IntoIterator<Item = (String, String)>) -> Self {
        self.fallbacks.extend(links);
        self
    }

    pub fn default_provider(mut self, kind: MediaKind, name: impl Into<String>) -> Self {
        self.defaults.insert(kind, name.into());
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ProviderRegistry, RegistryError> {
        let next = self.validate_links()?;

        for kind in ALL_KINDS {
            let name = self
                .defaults
                .get(&kind)
                .ok_or(RegistryError::MissingDefault(kind))?;
            self.check_kind(name, kind)?;
        }

        let mut chains: HashMap<String, Arc<dyn Generator>> = HashMap::new();
        for name in self.generators.keys() {
            self.link(name, &next, &mut chains);
        }

        for (name, chain) in &chains {
            tracing::debug!(
                provider = %name,
                kind = %chain.kind(),
                fallback = next.get(name).map(String::as_str),
                "Provider registered",
            );
        }

        Ok(ProviderRegistry {
            chains,
            defaults: self.defaults,
        })
    }

    fn check_kind(&self, name: &str, expected: MediaKind) -> Result<(), RegistryError> {
        let generator = self
            .generators
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))?;
        let actual = generator.kind();
        if actual != expected {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Validate fallback links and return them as a `from → to` map.
    fn validate_links(&self) -> Result<HashMap<String, String>, RegistryError> {
        let mut next = HashMap::new();
        for (from, to) in &self.fallbacks {
            let from_gen = self
                .generators
                .get(from)
                .ok_or_else(|| RegistryError::UnknownProvider(from.clone()))?;
            self.check_kind(to, from_gen.kind())?;
            if next.insert(from.clone(), to.clone()).is_some() {
                return Err(RegistryError::DuplicateFallback(from.clone()));
            }
        }

        for start in next.keys() {
            let mut seen = HashSet::from([start.as_str()]);
            let mut cursor = start.as_str();
            while let Some(to) = next.get(cursor) {
                if !seen.insert(to.as_str()) {
                    return Err(RegistryError::Cycle(start.clone()));
                }
                cursor = to.as_str();
            }
        }

        Ok(next)
    }

    /// Build (or reuse) the chain headed by `name`. Links are acyclic.
    fn link(
        &self,
        name: &str,
        next: &HashMap<String, String>,
        chains: &mut HashMap<String, Arc<dyn Generator>>,
    ) -> Arc<dyn Generator> {
        if let Some(existing) = chains.get(name) {
            return Arc::clone(existing);
        }

        let mut head = FallbackGenerator::new(Arc::clone(&self.generators[name]), self.call_timeout);
        if let Some(to) = next.get(name) {
            head = head.with_fallback(self.link(to, next, chains));
        }

        let head: Arc<dyn Generator> = Arc::new(head);
        chains.insert(name.to_string(), Arc::clone(&head));
        head
    }
}
