//! Archive installer - Extracts uploaded plugin bundles into the plugins root
//!
//! The destination folder is named after the manifest inside the archive,
//! never after the archive file itself.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

use super::layout::{PluginLayout, MANIFEST_FILE};
use super::manifest;
use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{PluginDescriptor, PluginOrigin};

/// A validated manifest found inside an archive
#[derive(Debug, Clone)]
pub struct ArchivePlugin {
    pub descriptor: PluginDescriptor,
    /// Directory inside the archive that holds the manifest
    pub root: PathBuf,
}

/// Result of extracting an archive
#[derive(Debug, Clone)]
pub struct InstalledFolder {
    pub descriptor: PluginDescriptor,
    pub folder: PathBuf,
    /// Whether the folder did not exist before this extraction
    pub created: bool,
}

fn sanitize_archive_path(path: &Path) -> PluginResult<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(PluginError::Archive(format!(
                    "archive entry escapes destination: {}",
                    path.display()
                )));
            }
            Component::CurDir => {}
            Component::Normal(part) => cleaned.push(part),
        }
    }
    Ok(cleaned)
}

fn open_archive(path: &Path) -> PluginResult<ZipArchive<File>> {
    let file = File::open(path)
        .map_err(|e| PluginError::Archive(format!("could not open {}: {}", path.display(), e)))?;
    ZipArchive::new(file)
        .map_err(|e| PluginError::Archive(format!("could not read {}: {}", path.display(), e)))
}

#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    layout: PluginLayout,
}

impl ArchiveInstaller {
    pub fn new(layout: PluginLayout) -> Self {
        Self { layout }
    }

    /// Find, parse and validate the manifest without extracting anything
    pub fn inspect(&self, archive_path: &Path) -> PluginResult<ArchivePlugin> {
        let mut archive = open_archive(archive_path)?;

        let mut best: Option<(usize, PathBuf)> = None;
        for name in archive.file_names() {
            let path = sanitize_archive_path(Path::new(&name.replace('\\', "/")))?;
            if path.starts_with("__MACOSX") || path.file_name().and_then(|n| n.to_str()) != Some(MANIFEST_FILE) {
                continue;
            }
            let depth = path.components().count();
            if best.as_ref().map_or(true, |(d, _)| depth < *d) {
                best = Some((depth, PathBuf::from(name)));
            }
        }

        let Some((_, manifest_name)) = best else {
            return Err(PluginError::Archive(format!(
                "no {} found in {}",
                MANIFEST_FILE,
                archive_path.display()
            )));
        };

        let mut content = String::new();
        archive
            .by_name(&manifest_name.to_string_lossy())
            .map_err(|e| PluginError::Archive(format!("could not read manifest: {}", e)))?
            .read_to_string(&mut content)
            .map_err(|e| PluginError::Archive(format!("manifest is not valid UTF-8: {}", e)))?;

        let descriptor = manifest::parse(&content, PluginOrigin::Archive(archive_path.to_path_buf()))?;
        let root = sanitize_archive_path(&manifest_name)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(ArchivePlugin { descriptor, root })
    }

    /// Inspect and extract in one step
    pub fn install_from_archive(&self, archive_path: &Path) -> PluginResult<InstalledFolder> {
        let plugin = self.inspect(archive_path)?;
        self.extract(archive_path, plugin)
    }

    /// Extract the manifest's directory into the plugin folder and check its
    /// shape. A folder created by this call is removed again on failure.
    pub fn extract(&self, archive_path: &Path, plugin: ArchivePlugin) -> PluginResult<InstalledFolder> {
        let name = plugin.descriptor.name.clone();
        let folder = self.layout.folder(&name);
        let created = !folder.exists();

        let result = self
            .extract_into(archive_path, &plugin.root, &folder)
            .and_then(|_| self.validate_folder(&name));

        if let Err(e) = result {
            if created {
                if let Err(cleanup) = self.remove_folder(&name) {
                    tracing::warn!("Failed to clean up {}: {}", folder.display(), cleanup);
                }
            }
            return Err(e);
        }

        tracing::info!("Extracted plugin {} into {}", name, folder.display());
        Ok(InstalledFolder {
            descriptor: plugin.descriptor,
            folder,
            created,
        })
    }

    fn extract_into(&self, archive_path: &Path, root: &Path, dest: &Path) -> PluginResult<()> {
        let mut archive = open_archive(archive_path)?;
        fs::create_dir_all(dest)?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| PluginError::Archive(format!("could not read entry: {}", e)))?;
            let raw = entry.name().replace('\\', "/");
            let path = sanitize_archive_path(Path::new(&raw))?;

            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }

            let out = dest.join(rel);
            if entry.is_dir() {
                fs::create_dir_all(&out)?;
                continue;
            }
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out)?;
            io::copy(&mut entry, &mut out_file)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o755))?;
            }
        }

        Ok(())
    }

    /// Check that a plugin folder has an entry point and a manifest
    pub fn validate_folder(&self, name: &str) -> PluginResult<()> {
        let folder = self.layout.folder(name);

        if !folder.is_dir() {
            return Err(PluginError::FolderShapeInvalid(format!(
                "{} is not a folder",
                folder.display()
            )));
        }

        let entry_point = self.layout.entry_point(name);
        if !entry_point.is_file() {
            return Err(PluginError::FolderShapeInvalid(format!(
                "entry point {} is missing at folder {}",
                entry_point.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                folder.display()
            )));
        }

        if !self.layout.manifest(name).is_file() {
            return Err(PluginError::FolderShapeInvalid(format!(
                "{} is missing at folder {}",
                MANIFEST_FILE,
                folder.display()
            )));
        }

        Ok(())
    }

    /// Remove a plugin folder, including its environment
    pub fn remove_folder(&self, name: &str) -> PluginResult<()> {
        let folder = self.layout.folder(name);
        if folder.exists() {
            fs::remove_dir_all(&folder)?;
            tracing::info!("Removed plugin folder {}", folder.display());
        }
        Ok(())
    }
}
