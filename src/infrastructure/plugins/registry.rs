//! Plugin registry - In-memory table of known plugins
//!
//! Only the plugin manager mutates this table, always while holding its
//! activation lock.

use chrono::{DateTime, Utc};
use libloading::Library;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{PluginDescriptor, PluginStatus, PluginSummary};

/// One plugin known to the host
pub struct PluginEntry {
    pub descriptor: PluginDescriptor,
    pub status: PluginStatus,
    pub loaded_at: DateTime<Utc>,
    /// Keeps native code mapped while its handlers are registered
    library: Option<Arc<Library>>,
}

impl PluginEntry {
    pub fn active(descriptor: PluginDescriptor, library: Option<Arc<Library>>) -> Self {
        Self {
            descriptor,
            status: PluginStatus::Active,
            loaded_at: Utc::now(),
            library,
        }
    }

    pub fn dormant(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor,
            status: PluginStatus::Dormant,
            loaded_at: Utc::now(),
            library: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PluginStatus::Active
    }

    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            author: self.descriptor.author.to_string(),
            status: self.status,
            settings: self.descriptor.settings.len(),
            loaded_at: self.loaded_at,
        }
    }

    /// Give up the native library, if any
    pub fn take_library(&mut self) -> Option<Arc<Library>> {
        self.library.take()
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.descriptor.name)
            .field("status", &self.status)
            .field("loaded_at", &self.loaded_at)
            .field("native", &self.library.is_some())
            .finish()
    }
}

/// Registry for managing known plugins, keyed by name
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, PluginEntry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PluginResult<RwLockReadGuard<'_, BTreeMap<String, PluginEntry>>> {
        self.plugins
            .read()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn write(&self) -> PluginResult<RwLockWriteGuard<'_, BTreeMap<String, PluginEntry>>> {
        self.plugins
            .write()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    /// Insert an entry, returning the one it replaced
    pub fn insert(&self, entry: PluginEntry) -> PluginResult<Option<PluginEntry>> {
        let name = entry.descriptor.name.clone();
        let previous = self.write()?.insert(name.clone(), entry);
        tracing::debug!("Registered plugin {} (replaced: {})", name, previous.is_some());
        Ok(previous)
    }

    pub fn remove(&self, name: &str) -> PluginResult<Option<PluginEntry>> {
        Ok(self.write()?.remove(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().map(|p| p.contains_key(name)).unwrap_or(false)
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.read().ok()?.get(name).map(|e| e.status)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.status(name) == Some(PluginStatus::Active)
    }

    /// Snapshot of a plugin's descriptor
    pub fn descriptor(&self, name: &str) -> Option<PluginDescriptor> {
        self.read().ok()?.get(name).map(|e| e.descriptor.clone())
    }

    /// Run `f` against a plugin's descriptor in place
    pub fn update_descriptor<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut PluginDescriptor) -> R,
    ) -> PluginResult<R> {
        let mut plugins = self.write()?;
        let entry = plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Ok(f(&mut entry.descriptor))
    }

    /// Mark a plugin dormant, handing back its library so the caller controls
    /// when the code is unmapped
    pub fn set_dormant(&self, name: &str) -> PluginResult<Option<Arc<Library>>> {
        let mut plugins = self.write()?;
        let entry = plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entry.status = PluginStatus::Dormant;
        Ok(entry.take_library())
    }

    /// Summaries sorted by name
    pub fn list(&self) -> Vec<PluginSummary> {
        self.read()
            .map(|p| p.values().map(PluginEntry::summary).collect())
            .unwrap_or_default()
    }

    pub fn active_names(&self) -> Vec<String> {
        self.read()
            .map(|p| {
                p.values()
                    .filter(|e| e.is_active())
                    .map(|e| e.descriptor.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
