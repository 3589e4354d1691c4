//! Live application instance registry.

use dashmap::DashMap;

use crate::app::AppHandle;
use crate::observability::metrics;

/// Process-wide map from path prefix (`app_<id>/`) to the control handle of
/// a live application instance.
///
/// Routing is the read path, registration the write path; DashMap gives the
/// mutex-per-shard guarding the threaded runtime requires. Entries are weak
/// references to the instance: the registry never owns the worker's
/// lifecycle, and a handle whose worker has stopped is evicted lazily on
/// lookup.
#[derive(Default)]
pub struct AppRegistry {
    apps: DashMap<String, AppHandle>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the mapping for a prefix. Instances announce
    /// themselves at navigation time, before their first request, so a
    /// reloaded page simply replaces its previous registration.
    pub fn register(&self, prefix: impl Into<String>, handle: AppHandle) {
        let prefix = prefix.into();
        let replaced = self.apps.insert(prefix.clone(), handle).is_some();
        tracing::info!(%prefix, replaced, "application registered");
        metrics::record_registry_size(self.apps.len());
    }

    /// Remove a mapping, returning the handle if one was present.
    pub fn deregister(&self, prefix: &str) -> Option<AppHandle> {
        let removed = self.apps.remove(prefix).map(|(_, handle)| handle);
        if removed.is_some() {
            tracing::info!(prefix, "application deregistered");
        }
        metrics::record_registry_size(self.apps.len());
        removed
    }

    /// Look up the handle for a prefix. A handle whose instance has stopped
    /// is evicted and reported as absent.
    pub fn lookup(&self, prefix: &str) -> Option<AppHandle> {
        let handle = self.apps.get(prefix).map(|entry| entry.value().clone())?;
        if handle.is_closed() {
            tracing::debug!(prefix, "evicting stopped application instance");
            self.apps.remove(prefix);
            return None;
        }
        Some(handle)
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
