//! On-disk layout of the plugins root
//!
//! ```text
//! <root>/<name>/
//!     <entry point>       shared library, e.g. libstickers.so
//!     plugin.toml
//!     requirements.txt    generated dependency list
//!     env/                isolated dependency environment
//! ```

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "plugin.toml";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const ENVIRONMENT_DIR: &str = "env";

/// File name of a plugin's entry-point library
pub fn entry_point_name(plugin_name: &str) -> String {
    format!("{}{}{}", DLL_PREFIX, plugin_name, DLL_SUFFIX)
}

#[derive(Debug, Clone)]
pub struct PluginLayout {
    root: PathBuf,
}

impl PluginLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn manifest(&self, name: &str) -> PathBuf {
        self.folder(name).join(MANIFEST_FILE)
    }

    pub fn entry_point(&self, name: &str) -> PathBuf {
        self.folder(name).join(entry_point_name(name))
    }

    pub fn requirements(&self, name: &str) -> PathBuf {
        self.folder(name).join(REQUIREMENTS_FILE)
    }

    pub fn environment(&self, name: &str) -> PathBuf {
        self.folder(name).join(ENVIRONMENT_DIR)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.folder(name).exists()
    }

    /// Names of installed plugin folders, sorted; hidden folders skipped
    pub fn installed(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();

        if !self.root.exists() {
            tracing::warn!("Plugin directory does not exist: {}", self.root.display());
            return Ok(names);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = PluginLayout::new("/srv/plugins");
        assert_eq!(layout.manifest("kibe"), PathBuf::from("/srv/plugins/kibe/plugin.toml"));
        assert_eq!(layout.environment("kibe"), PathBuf::from("/srv/plugins/kibe/env"));
        assert!(entry_point_name("kibe").contains("kibe"));
    }

    #[test]
    fn test_installed_skips_hidden_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("beta")).unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::create_dir(dir.path().join(".staging")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let layout = PluginLayout::new(dir.path());
        assert_eq!(layout.installed().unwrap(), vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_installed_missing_root() {
        let layout = PluginLayout::new("/nonexistent/plugbot/plugins");
        assert!(layout.installed().unwrap().is_empty());
    }
}
