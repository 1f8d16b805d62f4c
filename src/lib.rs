//! plugbot - a chat bot host with installable, isolated plugins

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{BotError, PluginError, PluginResult, SettingError};
pub use infrastructure::config::Config;
pub use plugins::PluginManager;
