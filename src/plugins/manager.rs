//! Plugin manager - handles plugin lifecycle
//!
//! A plugin moves through install, validation, provisioning, loading and
//! activation. Only one operation may be in flight per plugin name; distinct
//! names proceed concurrently. Dispatcher and table mutations happen under a
//! single activation lock.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use libloading::Library;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::bridge;
use super::settings;
use super::trait_def::{Hook, PluginContext};
use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{PluginDescriptor, PluginStatus, PluginSummary, SettingDescriptor};
use crate::domain::traits::{Client, Store};
use crate::infrastructure::config::PluginConfig;
use crate::infrastructure::plugins::{
    manifest, ArchiveInstaller, CodeLoader, LoadedUnit, PluginEntry, PluginLayout, PluginRegistry,
    Provisioner,
};

/// Stage of the operation currently running for a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Validating,
    Provisioning,
    Loading,
    Activating,
    Deactivating,
    Unloading,
    Configuring,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Validating => "validating",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Loading => "loading",
            LifecycleState::Activating => "activating",
            LifecycleState::Deactivating => "deactivating",
            LifecycleState::Unloading => "unloading",
            LifecycleState::Configuring => "configuring",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<String, LifecycleState>>>);

impl InFlight {
    fn begin(&self, name: &str, state: LifecycleState) -> PluginResult<OperationGuard> {
        let mut states = self
            .0
            .lock()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))?;
        if states.contains_key(name) {
            return Err(PluginError::Busy(name.to_string()));
        }
        states.insert(name.to_string(), state);
        Ok(OperationGuard {
            in_flight: self.clone(),
            name: name.to_string(),
        })
    }

    fn state_of(&self, name: &str) -> Option<LifecycleState> {
        self.0.lock().ok()?.get(name).copied()
    }
}

/// Marks a plugin name busy until dropped
struct OperationGuard {
    in_flight: InFlight,
    name: String,
}

impl OperationGuard {
    fn advance(&self, state: LifecycleState) {
        let mut states = self.in_flight.0.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(self.name.clone(), state);
        tracing::debug!("Plugin {} is {}", self.name, state);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut states = self.in_flight.0.lock().unwrap_or_else(|e| e.into_inner());
        states.remove(&self.name);
    }
}

/// A plugin that passed validation, provisioning and loading
struct Prepared {
    descriptor: PluginDescriptor,
    unit: LoadedUnit,
}

/// The steps of the full path that do not touch shared state
#[derive(Clone)]
struct Preparer {
    layout: PluginLayout,
    archive: ArchiveInstaller,
    provisioner: Provisioner,
    loader: Arc<dyn CodeLoader>,
}

impl Preparer {
    async fn prepare(&self, guard: &OperationGuard, name: &str, overwrite: bool) -> PluginResult<Prepared> {
        guard.advance(LifecycleState::Validating);
        let descriptor = self.validate(name).await?;

        guard.advance(LifecycleState::Provisioning);
        let environment = self.provisioner.ensure_environment(name, overwrite).await?;
        self.provisioner.install(&descriptor).await?;

        guard.advance(LifecycleState::Loading);
        let ctx = PluginContext {
            name: name.to_string(),
            folder: self.layout.folder(name),
            environment,
        };
        let loader = self.loader.clone();
        let unit = tokio::task::spawn_blocking(move || loader.load(&ctx))
            .await
            .map_err(|e| PluginError::LoadFailure {
                plugin: name.to_string(),
                reason: format!("loader task failed: {}", e),
            })??;

        Ok(Prepared { descriptor, unit })
    }

    /// Folder shape plus manifest, whose name must match the folder
    async fn validate(&self, name: &str) -> PluginResult<PluginDescriptor> {
        let archive = self.archive.clone();
        let folder = self.layout.folder(name);
        let plugin = name.to_string();

        let descriptor = tokio::task::spawn_blocking(move || {
            archive.validate_folder(&plugin)?;
            manifest::from_folder(&folder)
        })
        .await
        .map_err(|e| PluginError::Internal(format!("validation task failed: {}", e)))??;

        if descriptor.name != name {
            return Err(PluginError::FolderShapeInvalid(format!(
                "folder {} holds a manifest for '{}'",
                name, descriptor.name
            )));
        }
        Ok(descriptor)
    }
}

/// Outcome of startup reconciliation
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub dormant: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Manages all plugins for the bot
pub struct PluginManager {
    layout: PluginLayout,
    preparer: Preparer,
    registry: PluginRegistry,
    clients: Vec<Arc<dyn Client>>,
    store: Arc<dyn Store>,
    in_flight: InFlight,
    activation: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl PluginManager {
    /// Create a new plugin manager wired to both clients
    pub fn new(
        config: &PluginConfig,
        user: Arc<dyn Client>,
        assistant: Arc<dyn Client>,
        store: Arc<dyn Store>,
        loader: Arc<dyn CodeLoader>,
    ) -> Self {
        let layout = PluginLayout::new(&config.directory);
        let (shutdown, shutdown_rx) = watch::channel(false);

        Self {
            preparer: Preparer {
                layout: layout.clone(),
                archive: ArchiveInstaller::new(layout.clone()),
                provisioner: Provisioner::new(layout.clone(), config.installer.clone(), shutdown_rx),
                loader,
            },
            layout,
            registry: PluginRegistry::new(),
            clients: vec![user, assistant],
            store,
            in_flight: InFlight::default(),
            activation: tokio::sync::Mutex::new(()),
            shutdown,
        }
    }

    pub fn plugins_root(&self) -> &Path {
        self.layout.root()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn begin(&self, name: &str, state: LifecycleState) -> PluginResult<OperationGuard> {
        if self.is_shutting_down() {
            return Err(PluginError::Cancelled(name.to_string()));
        }
        self.in_flight.begin(name, state)
    }

    /// Install a plugin from a zip archive and activate it.
    ///
    /// On failure the folder created by this call is removed again.
    pub async fn install_archive(&self, archive_path: &Path) -> PluginResult<PluginSummary> {
        let archive = self.preparer.archive.clone();
        let path = archive_path.to_path_buf();
        let plugin = tokio::task::spawn_blocking(move || archive.inspect(&path))
            .await
            .map_err(|e| PluginError::Internal(format!("archive task failed: {}", e)))??;

        let name = plugin.descriptor.name.clone();
        let guard = self.begin(&name, LifecycleState::Installing)?;
        if self.registry.is_active(&name) {
            return Err(PluginError::AlreadyLoaded(name));
        }

        let archive = self.preparer.archive.clone();
        let path = archive_path.to_path_buf();
        let installed = tokio::task::spawn_blocking(move || archive.extract(&path, plugin))
            .await
            .map_err(|e| PluginError::Internal(format!("archive task failed: {}", e)))??;

        match self.install_extracted(&guard, &name).await {
            Ok(summary) => {
                info!("Installed plugin {} from {}", name, archive_path.display());
                Ok(summary)
            }
            Err(e) => {
                error!("Failed to install plugin {}: {}", name, e);
                if installed.created && !matches!(e, PluginError::Cancelled(_)) {
                    self.forget(&name).await;
                    self.remove_folder(&name).await;
                }
                Err(e)
            }
        }
    }

    async fn install_extracted(&self, guard: &OperationGuard, name: &str) -> PluginResult<PluginSummary> {
        let prepared = self.preparer.prepare(guard, name, false).await?;
        let summary = self.activate(guard, prepared).await?;
        self.clear_inactive(name).await?;
        Ok(summary)
    }

    /// Run the full path for a plugin already present under the plugins root
    pub async fn load(&self, name: &str) -> PluginResult<PluginSummary> {
        let guard = self.begin(name, LifecycleState::Loading)?;
        if self.registry.is_active(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        if !self.layout.exists(name) {
            return Err(PluginError::NotFound(name.to_string()));
        }

        let prepared = self.preparer.prepare(&guard, name, false).await?;
        self.activate(&guard, prepared).await
    }

    async fn run_hooks(
        &self,
        name: &str,
        stage: &str,
        hooks: &[Hook],
        library: Option<&Arc<Library>>,
    ) -> PluginResult<()> {
        for hook in hooks {
            match hook {
                Hook::Async(f) => {
                    let f = f.clone();
                    // The future is built inside the task so a panicking
                    // constructor surfaces as a JoinError too
                    tokio::spawn(async move { f().await })
                        .await
                        .map_err(|e| PluginError::LoadFailure {
                            plugin: name.to_string(),
                            reason: format!("{} hook failed: {}", stage, e),
                        })?;
                }
                Hook::Blocking(f) => {
                    let f = f.clone();
                    let library = library.cloned();
                    let plugin = name.to_string();
                    let stage = stage.to_string();
                    // Fire and forget; the hook's code stays mapped until it returns
                    tokio::task::spawn_blocking(move || {
                        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f())).is_err() {
                            warn!("{} hook of {} panicked", stage, plugin);
                        }
                        drop(library);
                    });
                }
            }
        }
        Ok(())
    }

    async fn activate(&self, guard: &OperationGuard, prepared: Prepared) -> PluginResult<PluginSummary> {
        guard.advance(LifecycleState::Activating);
        let Prepared { mut descriptor, unit } = prepared;
        let name = descriptor.name.clone();

        let library = unit.library.as_ref();
        self.run_hooks(&name, "pre-load", &unit.elements.pre_load, library).await?;
        self.run_hooks(&name, "post-load", &unit.elements.post_load, library).await?;

        let _lock = self.activation.lock().await;

        let mut attached = 0;
        for client in &self.clients {
            attached += bridge::attach(&name, &unit.elements, client.as_ref());
        }

        match settings::restore(self.store.as_ref(), &mut descriptor).await {
            Ok(0) => {}
            Ok(n) => info!("Restored {} settings of {}", n, name),
            Err(e) => warn!("Could not restore settings of {}: {}", name, e),
        }

        let LoadedUnit { elements, library } = unit;
        drop(elements);

        let entry = PluginEntry::active(descriptor, library);
        let summary = entry.summary();
        if let Err(e) = self.registry.insert(entry) {
            for client in &self.clients {
                bridge::detach(&name, client.as_ref());
            }
            return Err(e);
        }

        info!("Activated plugin {} ({} handlers)", name, attached);
        Ok(summary)
    }

    /// Detach handlers and unmap code, keeping the plugin listed as dormant
    async fn deactivate(&self, name: &str) -> PluginResult<()> {
        let _lock = self.activation.lock().await;
        for client in &self.clients {
            bridge::detach(name, client.as_ref());
        }
        if self.registry.contains(name) {
            drop(self.registry.set_dormant(name)?);
        }
        Ok(())
    }

    /// Drop a plugin from the clients and the table without touching disk
    async fn forget(&self, name: &str) {
        let _lock = self.activation.lock().await;
        for client in &self.clients {
            bridge::detach(name, client.as_ref());
        }
        if let Err(e) = self.registry.remove(name) {
            warn!("Failed to forget plugin {}: {}", name, e);
        }
    }

    async fn remove_folder(&self, name: &str) {
        let archive = self.preparer.archive.clone();
        let plugin = name.to_string();
        let result = tokio::task::spawn_blocking(move || archive.remove_folder(&plugin)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to remove folder of {}: {}", name, e),
            Err(e) => warn!("Failed to remove folder of {}: {}", name, e),
        }
    }

    async fn mark_inactive(&self, name: &str, inactive: bool) -> PluginResult<()> {
        let mut set = settings::load_inactive(self.store.as_ref()).await?;
        let changed = if inactive {
            set.insert(name.to_string())
        } else {
            set.remove(name)
        };
        if changed {
            settings::save_inactive(self.store.as_ref(), &set).await?;
        }
        Ok(())
    }

    /// Take a freshly activated plugin out of the inactive set. If that cannot
    /// be saved the activation is undone, so the table matches what the next
    /// startup will do.
    async fn clear_inactive(&self, name: &str) -> PluginResult<()> {
        if let Err(e) = self.mark_inactive(name, false).await {
            warn!("Could not mark plugin {} active, deactivating: {}", name, e);
            if let Err(undo) = self.deactivate(name).await {
                warn!("Failed to deactivate plugin {}: {}", name, undo);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove a plugin: handlers, code, folder, environment and settings
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let _guard = self.begin(name, LifecycleState::Unloading)?;
        if !self.registry.contains(name) && !self.layout.exists(name) {
            return Err(PluginError::NotFound(name.to_string()));
        }

        {
            let _lock = self.activation.lock().await;
            let mut removed = 0;
            for client in &self.clients {
                removed += bridge::detach(name, client.as_ref());
            }
            drop(self.registry.remove(name)?);
            info!("Unloaded plugin {} ({} handlers removed)", name, removed);
        }

        self.remove_folder(name).await;
        self.store.delete_plugin_settings(name).await?;
        self.mark_inactive(name, false).await?;
        Ok(())
    }

    /// Deactivate and run the full path again from the existing folder
    pub async fn reload(&self, name: &str) -> PluginResult<PluginSummary> {
        let guard = self.begin(name, LifecycleState::Deactivating)?;
        if !self.registry.contains(name) {
            return Err(PluginError::NotFound(name.to_string()));
        }

        self.deactivate(name).await?;
        let result = match self.preparer.prepare(&guard, name, false).await {
            Ok(prepared) => self.activate(&guard, prepared).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(summary) => {
                info!("Reloaded plugin {}", name);
                Ok(summary)
            }
            Err(e) => {
                // Not added to the inactive set, so the next startup tries again
                warn!("Reload of {} failed, left dormant until restart: {}", name, e);
                Err(e)
            }
        }
    }

    /// Keep a plugin listed but stop it handling messages, now and at startup
    pub async fn disable(&self, name: &str) -> PluginResult<()> {
        let _guard = self.begin(name, LifecycleState::Deactivating)?;
        if !self.registry.contains(name) {
            return Err(PluginError::NotFound(name.to_string()));
        }

        self.mark_inactive(name, true).await?;
        self.deactivate(name).await?;
        info!("Disabled plugin {}", name);
        Ok(())
    }

    /// Remove a plugin from the inactive set and activate it
    pub async fn enable(&self, name: &str) -> PluginResult<PluginSummary> {
        let guard = self.begin(name, LifecycleState::Loading)?;
        if !self.layout.exists(name) {
            return Err(PluginError::NotFound(name.to_string()));
        }

        if self.registry.is_active(name) {
            self.mark_inactive(name, false).await?;
            return self
                .registry
                .list()
                .into_iter()
                .find(|s| s.name == name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()));
        }

        let prepared = self.preparer.prepare(&guard, name, false).await?;
        let summary = self.activate(&guard, prepared).await?;
        self.clear_inactive(name).await?;
        info!("Enabled plugin {}", name);
        Ok(summary)
    }

    async fn register_dormant(&self, guard: &OperationGuard, name: &str) -> PluginResult<()> {
        guard.advance(LifecycleState::Validating);
        let mut descriptor = self.preparer.validate(name).await?;
        if let Err(e) = settings::restore(self.store.as_ref(), &mut descriptor).await {
            warn!("Could not restore settings of {}: {}", name, e);
        }

        let _lock = self.activation.lock().await;
        self.registry.insert(PluginEntry::dormant(descriptor))?;
        Ok(())
    }

    /// Startup reconciliation over every folder under the plugins root
    pub async fn load_all_installed(&self) -> PluginResult<LoadReport> {
        let mut report = LoadReport::default();

        let inactive = match settings::load_inactive(self.store.as_ref()).await {
            Ok(set) => set,
            Err(e) => {
                warn!("Could not read inactive plugins, treating all as active: {}", e);
                BTreeSet::new()
            }
        };

        let root = self.layout.clone();
        let installed = tokio::task::spawn_blocking(move || root.installed())
            .await
            .map_err(|e| PluginError::Internal(format!("scan task failed: {}", e)))??;

        for name in inactive.iter().filter(|n| !installed.contains(n)) {
            warn!("Inactive plugin {} is not installed", name);
        }

        let mut tasks = JoinSet::new();
        for name in installed {
            let guard = match self.begin(&name, LifecycleState::Validating) {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("Skipping plugin {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            };
            if self.registry.is_active(&name) {
                continue;
            }

            if inactive.contains(&name) {
                match self.register_dormant(&guard, &name).await {
                    Ok(()) => {
                        info!("Plugin {} is inactive, registered dormant", name);
                        report.dormant.push(name);
                    }
                    Err(e) => {
                        warn!("Skipping plugin {}: {}", name, e);
                        report.failed.push((name, e.to_string()));
                    }
                }
                continue;
            }

            let preparer = self.preparer.clone();
            tasks.spawn(async move {
                let result = preparer.prepare(&guard, &name, false).await;
                (guard, name, result)
            });
        }

        // Preparation runs concurrently, activation one at a time
        while let Some(joined) = tasks.join_next().await {
            let (guard, name, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Plugin preparation task failed: {}", e);
                    continue;
                }
            };

            let outcome = match result {
                Ok(prepared) => self.activate(&guard, prepared).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(_) => report.loaded.push(name),
                Err(e) => {
                    error!("Failed to load plugin {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            "Plugins: {} loaded, {} dormant, {} failed",
            report.loaded.len(),
            report.dormant.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Register every valid installed plugin as dormant without loading any
    /// code. Used by the command line to inspect and configure plugins.
    pub async fn discover(&self) -> PluginResult<LoadReport> {
        let mut report = LoadReport::default();
        let root = self.layout.clone();
        let installed = tokio::task::spawn_blocking(move || root.installed())
            .await
            .map_err(|e| PluginError::Internal(format!("scan task failed: {}", e)))??;

        for name in installed {
            if self.registry.contains(&name) {
                continue;
            }
            let result = match self.begin(&name, LifecycleState::Validating) {
                Ok(guard) => self.register_dormant(&guard, &name).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.dormant.push(name),
                Err(e) => {
                    warn!("Skipping plugin {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Names persisted as inactive
    pub async fn inactive(&self) -> PluginResult<BTreeSet<String>> {
        settings::load_inactive(self.store.as_ref()).await
    }

    /// List all known plugins
    pub fn list(&self) -> Vec<PluginSummary> {
        self.registry.list()
    }

    pub fn descriptor(&self, name: &str) -> Option<PluginDescriptor> {
        self.registry.descriptor(name)
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.registry.status(name)
    }

    /// Stage of the operation in flight for `name`, if any
    pub fn state_of(&self, name: &str) -> Option<LifecycleState> {
        self.in_flight.state_of(name)
    }

    pub async fn toggle_setting(&self, name: &str, key: &str) -> PluginResult<SettingDescriptor> {
        let _guard = self.begin(name, LifecycleState::Configuring)?;
        settings::toggle(&self.registry, self.store.as_ref(), name, key).await
    }

    pub async fn set_setting(&self, name: &str, key: &str, raw: &str) -> PluginResult<SettingDescriptor> {
        let _guard = self.begin(name, LifecycleState::Configuring)?;
        settings::set(&self.registry, self.store.as_ref(), name, key, raw).await
    }

    /// Path a plugin would be installed to
    pub fn folder_of(&self, name: &str) -> PathBuf {
        self.layout.folder(name)
    }

    /// Refuse new operations and kill running installers, without waiting.
    /// Operations already in flight finish with `Cancelled`.
    pub fn request_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Plugin manager shutdown requested");
        }
    }

    /// Cancel running installers and detach every plugin.
    ///
    /// Partially provisioned folders are left for the next startup.
    pub async fn shutdown(&self) {
        info!("Shutting down plugin manager");
        self.request_shutdown();

        let _lock = self.activation.lock().await;
        for name in self.registry.active_names() {
            for client in &self.clients {
                bridge::detach(&name, client.as_ref());
            }
            match self.registry.set_dormant(&name) {
                Ok(library) => drop(library),
                Err(e) => warn!("Failed to release plugin {}: {}", name, e),
            }
        }
    }
}
