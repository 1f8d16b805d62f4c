//! Plugin loader - Imports plugin code and classifies its elements by role

use libloading::{Library, Symbol};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::layout::entry_point_name;
use crate::application::errors::{PluginError, PluginResult};
use crate::domain::traits::ClientContext;
use crate::plugins::trait_def::{
    Controller, HandlerEntry, Hook, PluginContext, PluginElement, PluginElements, PluginEntryFn,
    API_VERSION_SYMBOL, ENTRY_SYMBOL, PLUGIN_API_VERSION,
};

/// A plugin's elements bucketed by role
#[derive(Clone, Default)]
pub struct PluginElementCollection {
    pub pre_load: Vec<Hook>,
    pub post_load: Vec<Hook>,
    pub user_handlers: Vec<HandlerEntry>,
    pub assistant_handlers: Vec<HandlerEntry>,
    pub user_controllers: Vec<Arc<dyn Controller>>,
    pub assistant_controllers: Vec<Arc<dyn Controller>>,
}

impl PluginElementCollection {
    pub fn classify(elements: PluginElements) -> Self {
        let mut collection = Self::default();

        for element in elements.into_vec() {
            match element {
                PluginElement::PreLoad(hook) => collection.pre_load.push(hook),
                PluginElement::PostLoad(hook) => collection.post_load.push(hook),
                PluginElement::Handler { context: ClientContext::User, entries } => {
                    collection.user_handlers.extend(entries)
                }
                PluginElement::Handler { context: ClientContext::Assistant, entries } => {
                    collection.assistant_handlers.extend(entries)
                }
                PluginElement::Controller { context: ClientContext::User, controller } => {
                    collection.user_controllers.push(controller)
                }
                PluginElement::Controller { context: ClientContext::Assistant, controller } => {
                    collection.assistant_controllers.push(controller)
                }
            }
        }

        collection
    }

    pub fn handlers_for(&self, context: ClientContext) -> &[HandlerEntry] {
        match context {
            ClientContext::User => &self.user_handlers,
            ClientContext::Assistant => &self.assistant_handlers,
        }
    }

    pub fn controllers_for(&self, context: ClientContext) -> &[Arc<dyn Controller>] {
        match context {
            ClientContext::User => &self.user_controllers,
            ClientContext::Assistant => &self.assistant_controllers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre_load.is_empty()
            && self.post_load.is_empty()
            && self.user_handlers.is_empty()
            && self.assistant_handlers.is_empty()
            && self.user_controllers.is_empty()
            && self.assistant_controllers.is_empty()
    }
}

/// Loaded plugin code
pub struct LoadedUnit {
    pub elements: PluginElementCollection,
    /// Keeps native code mapped; must outlive every registered handler and
    /// every hook still running on the blocking pool
    pub library: Option<Arc<Library>>,
}

/// Imports a plugin's code unit
pub trait CodeLoader: Send + Sync {
    fn load(&self, ctx: &PluginContext) -> PluginResult<LoadedUnit>;
}

fn load_failure(ctx: &PluginContext, reason: impl Into<String>) -> PluginError {
    PluginError::LoadFailure {
        plugin: ctx.name.clone(),
        reason: reason.into(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("entry function panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("entry function panicked: {}", s)
    } else {
        "entry function panicked".to_string()
    }
}

fn call_entry<F>(ctx: &PluginContext, entry: F) -> PluginResult<PluginElements>
where
    F: FnOnce(&PluginContext) -> PluginElements,
{
    panic::catch_unwind(AssertUnwindSafe(|| entry(ctx)))
        .map_err(|payload| load_failure(ctx, panic_message(payload)))
}

/// Loads plugins built as shared libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl CodeLoader for NativeLoader {
    fn load(&self, ctx: &PluginContext) -> PluginResult<LoadedUnit> {
        let library_path = ctx.folder.join(entry_point_name(&ctx.name));
        if !library_path.exists() {
            return Err(load_failure(
                ctx,
                format!("Library not found: {}", library_path.display()),
            ));
        }

        // Load the library
        let library = unsafe {
            Library::new(&library_path)
                .map_err(|e| load_failure(ctx, format!("Failed to load library: {}", e)))?
        };

        let version = unsafe {
            let symbol: Symbol<*const u32> = library
                .get(API_VERSION_SYMBOL)
                .map_err(|e| load_failure(ctx, format!("Failed to find API version: {}", e)))?;
            **symbol
        };
        if version != PLUGIN_API_VERSION {
            return Err(load_failure(
                ctx,
                format!(
                    "built for plugin API v{} but the host provides v{}",
                    version, PLUGIN_API_VERSION
                ),
            ));
        }

        // Get the entry function
        let entry: PluginEntryFn = unsafe {
            let symbol: Symbol<PluginEntryFn> = library
                .get(ENTRY_SYMBOL)
                .map_err(|e| load_failure(ctx, format!("Failed to find entry function: {}", e)))?;
            *symbol
        };

        let elements = call_entry(ctx, entry)?;
        tracing::info!("Loaded plugin library: {} ({} elements)", ctx.name, elements.len());

        Ok(LoadedUnit {
            elements: PluginElementCollection::classify(elements),
            library: Some(Arc::new(library)),
        })
    }
}

type BuiltinEntry = Arc<dyn Fn(&PluginContext) -> PluginElements + Send + Sync>;

/// Loads plugins whose code is linked into the host
#[derive(Default, Clone)]
pub struct BuiltinLoader {
    entries: HashMap<String, BuiltinEntry>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin<F>(mut self, name: impl Into<String>, entry: F) -> Self
    where
        F: Fn(&PluginContext) -> PluginElements + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(entry));
        self
    }
}

impl CodeLoader for BuiltinLoader {
    fn load(&self, ctx: &PluginContext) -> PluginResult<LoadedUnit> {
        let entry = self
            .entries
            .get(&ctx.name)
            .ok_or_else(|| load_failure(ctx, "no builtin entry registered"))?;

        let elements = call_entry(ctx, |c| entry(c))?;

        Ok(LoadedUnit {
            elements: PluginElementCollection::classify(elements),
            library: None,
        })
    }
}
