//! Whitelist-based save/restore of ambient request context across the
//! submitter-to-worker boundary.
//!
//! Only entries explicitly declared supported by a registered provider ever
//! cross the boundary. Save and restore are best-effort: failures are logged
//! and never abort the job.

use crate::error::ContextError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Shared key-value view of a request's ambient context (current user,
/// locale, correlation ids...). Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ContextMap {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// A plugin that knows how to save and restore a fixed set of context
/// entries. Registering a provider is what whitelists its entries.
pub trait ContextValueProvider: Send + Sync {
    fn supported_entries(&self) -> Vec<String>;

    fn save(&self, entry: &str, source: &ContextMap) -> Result<Option<Value>, ContextError>;

    fn restore(&self, entry: &str, value: &Value, target: &ContextMap) -> Result<(), ContextError>;
}

/// Copies entries verbatim. Sufficient for plain values like user ids and
/// locales; providers with richer needs implement the trait directly.
pub struct PassthroughContextProvider {
    entries: Vec<String>,
}

impl PassthroughContextProvider {
    pub fn new(entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }
}

impl ContextValueProvider for PassthroughContextProvider {
    fn supported_entries(&self) -> Vec<String> {
        self.entries.clone()
    }

    fn save(&self, entry: &str, source: &ContextMap) -> Result<Option<Value>, ContextError> {
        Ok(source.get(entry))
    }

    fn restore(&self, entry: &str, value: &Value, target: &ContextMap) -> Result<(), ContextError> {
        target.set(entry, value.clone());
        Ok(())
    }
}

/// Registry of context providers plus the save/restore entry points used by
/// the scheduler.
#[derive(Default)]
pub struct ContextStore {
    providers: RwLock<Vec<Arc<dyn ContextValueProvider>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn ContextValueProvider>) {
        self.providers.write().push(provider);
    }

    /// Every entry some registered provider supports, sorted and deduped.
    pub fn supported_entries(&self) -> Vec<String> {
        let providers = self.providers.read();
        let mut entries: Vec<String> = providers
            .iter()
            .flat_map(|p| p.supported_entries())
            .collect();
        entries.sort();
        entries.dedup();
        entries
    }

    /// Save the requested entries out of `source`. Entries no provider
    /// supports are skipped; provider failures are logged and skipped. An
    /// empty or absent entry set is a no-op returning an empty map.
    pub fn save(
        &self,
        entries: Option<&[String]>,
        source: &ContextMap,
    ) -> HashMap<String, Value> {
        let mut saved = HashMap::new();
        let Some(entries) = entries else {
            return saved;
        };

        let providers = self.providers.read();
        for entry in entries {
            let Some(provider) = providers
                .iter()
                .find(|p| p.supported_entries().iter().any(|e| e == entry))
            else {
                warn!(entry = %entry, "context entry not supported by any provider, skipping");
                continue;
            };
            match provider.save(entry, source) {
                Ok(Some(value)) => {
                    saved.insert(entry.clone(), value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(entry = %entry, error = %err, "failed to save context entry");
                }
            }
        }
        saved
    }

    /// Install previously saved entries onto `target`. Best-effort; an empty
    /// map is a no-op.
    pub fn restore(&self, saved: &HashMap<String, Value>, target: &ContextMap) {
        let providers = self.providers.read();
        for (entry, value) in saved {
            let Some(provider) = providers
                .iter()
                .find(|p| p.supported_entries().iter().any(|e| e == entry))
            else {
                warn!(entry = %entry, "no provider to restore context entry, skipping");
                continue;
            };
            if let Err(err) = provider.restore(entry, value, target) {
                warn!(entry = %entry, error = %err, "failed to restore context entry");
            }
        }
    }
}
