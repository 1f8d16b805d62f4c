//! Domain entities - Core business objects with no external dependencies

pub mod message;
pub mod plugin;
pub mod setting;

pub use message::{Content, Message, MessageType};
pub use plugin::{Author, PluginDescriptor, PluginOrigin, PluginStatus, PluginSummary};
pub use setting::{SettingDescriptor, SettingType, SettingValue};
