//! Plugin descriptors and listing summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::setting::SettingDescriptor;

/// One or more plugin author identities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    One(String),
    Many(Vec<String>),
}

impl Author {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Author::One(name) => vec![name.as_str()],
            Author::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

/// Where a descriptor was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PluginOrigin {
    Archive(PathBuf),
    Folder(PathBuf),
}

/// Validated description of a plugin, built from its manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    pub author: Author,
    pub requirements: Vec<String>,
    pub settings: BTreeMap<String, SettingDescriptor>,
    pub origin: PluginOrigin,
}

impl PluginDescriptor {
    pub fn setting(&self, key: &str) -> Option<&SettingDescriptor> {
        self.settings.get(key)
    }

    pub fn setting_mut(&mut self, key: &str) -> Option<&mut SettingDescriptor> {
        self.settings.get_mut(key)
    }
}

/// Whether a listed plugin is handling traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Active,
    Dormant,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::Active => f.write_str("active"),
            PluginStatus::Dormant => f.write_str("dormant"),
        }
    }
}

/// Plugin information for listing
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub description: String,
    pub author: String,
    pub status: PluginStatus,
    pub settings: usize,
    pub loaded_at: DateTime<Utc>,
}
