//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Plugin lifecycle errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Invalid plugin manifest:\n{}", .0.join("\n"))]
    ManifestInvalid(Vec<String>),

    #[error("Invalid plugin requirements:\n{}", .0.join("\n"))]
    DependencyParse(Vec<String>),

    #[error("Failed to install requirements for '{plugin}':\n{output}")]
    ProvisionFailure { plugin: String, output: String },

    #[error("Failed to load plugin '{plugin}': {reason}")]
    LoadFailure { plugin: String, reason: String },

    #[error("Invalid plugin folder: {0}")]
    FolderShapeInvalid(String),

    #[error("Invalid plugin archive: {0}")]
    Archive(String),

    #[error("Plugin '{0}' has another operation in progress")]
    Busy(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Operation on plugin '{0}' was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Setting(#[from] SettingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Plugin lifecycle result
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised while changing a plugin setting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin '{0}' has no settings")]
    NoSettings(String),

    #[error("Plugin '{plugin}' has no setting '{key}'")]
    UnknownKey { plugin: String, key: String },

    #[error("Setting '{key}' of plugin '{plugin}' is not boolean")]
    NotBoolean { plugin: String, key: String },

    #[error("Invalid value for setting '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lock poisoned")]
    Poisoned,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
