//! Plugin system for plugbot
//!
//! Plugins are installed from archives into their own folders, get a private
//! dependency environment, and contribute handlers to the user and assistant
//! clients.

pub mod bridge;
pub mod manager;
pub mod settings;
pub mod trait_def;

pub use manager::{LifecycleState, LoadReport, PluginManager};
pub use trait_def::{
    Controller, HandlerEntry, Hook, HookFuture, PluginContext, PluginElement, PluginElements,
    PluginEntryFn, PLUGIN_API_VERSION,
};
