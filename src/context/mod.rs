//! Context provider registry and per-cycle snapshots
//!
//! Providers are registered once at startup under a unique name. Each cycle
//! resolves nothing new: the loop holds the providers resolved from
//! configuration and asks for a fresh [`ContextSnapshot`] every time.

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};

pub use providers::{ActiveWindowProvider, EnvironmentProvider, TimestampProvider};

use crate::{Error, Result};

/// Upper bound for a single provider's `produce` call
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(3);

/// Names of the built-in providers, in registration order
pub const BUILTIN_PROVIDERS: &[&str] = &["timestamp", "environment", "active_window"];

/// Produces one small context fact about the machine
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Produce the current fact
    ///
    /// # Errors
    ///
    /// Returns error if the underlying source is unavailable
    async fn produce(&self) -> Result<Value>;
}

/// A provider paired with the name it was resolved under
#[derive(Clone)]
pub struct ResolvedProvider {
    name: String,
    provider: Arc<dyn ContextProvider>,
}

impl ResolvedProvider {
    /// Name the provider was registered under
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry of named context providers
///
/// Built once at startup and read-only afterwards. Not a global: tests and the
/// binary each construct their own.
#[derive(Default)]
pub struct ContextProviderRegistry {
    providers: IndexMap<String, Arc<dyn ContextProvider>>,
}

impl ContextProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in providers
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for name in BUILTIN_PROVIDERS {
            if let Some(provider) = builtin_provider(name) {
                registry.providers.insert((*name).to_string(), provider);
            }
        }
        registry
    }

    /// Register a provider under a unique name
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateProvider` if the name is already taken
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn ContextProvider>,
    ) -> Result<()> {
        let name = name.into();
        if self.providers.contains_key(&name) {
            return Err(Error::DuplicateProvider(name));
        }

        tracing::debug!(provider = %name, "registered context provider");
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Resolve provider names into providers, preserving the requested order
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownProvider` naming the first unresolved entry
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ResolvedProvider>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.providers
                    .get(name)
                    .map(|provider| ResolvedProvider {
                        name: name.to_string(),
                        provider: Arc::clone(provider),
                    })
                    .ok_or_else(|| Error::UnknownProvider {
                        name: name.to_string(),
                        available: self.names().join(", "),
                    })
            })
            .collect()
    }

    /// Build a snapshot from resolved providers
    ///
    /// Providers run in order. A provider that errors or exceeds
    /// [`PROVIDER_TIMEOUT`] is recorded as unavailable; the snapshot itself
    /// never fails.
    pub async fn snapshot(providers: &[ResolvedProvider]) -> ContextSnapshot {
        Self::snapshot_with_timeout(providers, PROVIDER_TIMEOUT).await
    }

    /// Same as [`Self::snapshot`] with an explicit per-provider timeout
    pub async fn snapshot_with_timeout(
        providers: &[ResolvedProvider],
        timeout: Duration,
    ) -> ContextSnapshot {
        let mut facts = IndexMap::with_capacity(providers.len());

        for resolved in providers {
            let fact = match tokio::time::timeout(timeout, resolved.provider.produce()).await {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    tracing::warn!(provider = %resolved.name, error = %e, "context provider failed");
                    ContextSnapshot::unavailable(&e.to_string())
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %resolved.name,
                        timeout_ms = timeout.as_millis(),
                        "context provider timed out"
                    );
                    ContextSnapshot::unavailable("timed out")
                }
            };
            facts.insert(resolved.name.clone(), fact);
        }

        ContextSnapshot { facts }
    }

    /// Registered provider names, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Check whether a name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if no providers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Ordered provider name → fact mapping for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextSnapshot {
    facts: IndexMap<String, Value>,
}

impl ContextSnapshot {
    /// Fact recorded for a provider that could not produce a value
    #[must_use]
    pub fn unavailable(reason: &str) -> Value {
        json!({ "status": "unavailable", "error": reason })
    }

    /// Fact for a provider name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.facts.get(name)
    }

    /// Whether the named provider's fact is the unavailable marker
    #[must_use]
    pub fn is_unavailable(&self, name: &str) -> bool {
        self.facts
            .get(name)
            .and_then(|v| v.get("status"))
            .and_then(Value::as_str)
            == Some("unavailable")
    }

    /// Provider names in snapshot order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    /// Iterate facts in snapshot order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.facts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of facts
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Check if the snapshot holds no facts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Flatten facts into `provider.key` / value pairs, keeping snapshot order
    #[must_use]
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, value) in &self.facts {
            flatten_into(name, value, &mut out);
        }
        out
    }
}

impl FromIterator<(String, Value)> for ContextSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            facts: iter.into_iter().collect(),
        }
    }
}

/// Construct a built-in provider by name
#[must_use]
pub fn builtin_provider(name: &str) -> Option<Arc<dyn ContextProvider>> {
    let provider: Arc<dyn ContextProvider> = match name {
        "timestamp" => Arc::new(TimestampProvider),
        "environment" => Arc::new(EnvironmentProvider),
        "active_window" => Arc::new(ActiveWindowProvider::default()),
        _ => return None,
    };
    Some(provider)
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, inner) in map {
                flatten_into(&format!("{prefix}.{key}"), inner, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}
