//! Isolated per-plugin dependency environments
//!
//! An environment is a plain directory (`<plugin>/env`) that the configured
//! installer fills with the plugin's dependencies. Nothing here depends on a
//! particular package manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

use super::layout::PluginLayout;
use super::requirements;
use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::PluginDescriptor;
use crate::infrastructure::config::InstallerConfig;

const MARKER_FILE: &str = "environment.json";

/// Written into every environment when it is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMarker {
    pub plugin: String,
    pub created_at: DateTime<Utc>,
}

impl EnvironmentMarker {
    pub fn read(environment: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(environment.join(MARKER_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

fn create_environment(plugin: &str, path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path.join("lib"))?;
    std::fs::create_dir_all(path.join("bin"))?;

    let marker = EnvironmentMarker {
        plugin: plugin.to_string(),
        created_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&marker)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    std::fs::write(path.join(MARKER_FILE), json)
}

/// Resolves once shutdown has been requested
pub async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender gone: nobody can request shutdown any more
        std::future::pending::<()>().await;
    }
}

/// Creates environments and installs dependencies into them
#[derive(Debug, Clone)]
pub struct Provisioner {
    layout: PluginLayout,
    installer: InstallerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Provisioner {
    pub fn new(layout: PluginLayout, installer: InstallerConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            layout,
            installer,
            shutdown,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.installer.timeout_secs)
    }

    /// Create the environment if missing; with `overwrite`, always recreate it
    pub async fn ensure_environment(&self, name: &str, overwrite: bool) -> PluginResult<PathBuf> {
        let path = self.layout.environment(name);
        let plugin = name.to_string();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if overwrite && target.exists() {
                tracing::info!("Recreating environment for {}", plugin);
                std::fs::remove_dir_all(&target)?;
            }
            if !target.exists() {
                create_environment(&plugin, &target)?;
                tracing::debug!("Created environment {}", target.display());
            }
            Ok(())
        })
        .await
        .map_err(|e| PluginError::Internal(format!("environment task failed: {}", e)))??;

        Ok(path)
    }

    /// Write `requirements.txt` unless one already exists.
    ///
    /// Returns whether the file was written.
    pub async fn write_requirements(&self, descriptor: &PluginDescriptor) -> PluginResult<bool> {
        let path = self.layout.requirements(&descriptor.name);
        if tokio::fs::try_exists(&path).await? {
            tracing::debug!("Keeping existing {}", path.display());
            return Ok(false);
        }

        let resolved = requirements::resolve(&descriptor.requirements)?;
        tokio::fs::write(&path, resolved.to_requirements_file()).await?;
        Ok(true)
    }

    fn expand(&self, arg: &str, name: &str) -> String {
        arg.replace("{env}", &self.layout.environment(name).to_string_lossy())
            .replace("{requirements}", &self.layout.requirements(name).to_string_lossy())
            .replace("{folder}", &self.layout.folder(name).to_string_lossy())
            .replace("{plugin}", name)
    }

    /// Install the plugin's dependency list into its environment.
    ///
    /// Returns the installer's combined output; empty when there was nothing
    /// to install.
    pub async fn install(&self, descriptor: &PluginDescriptor) -> PluginResult<String> {
        let name = descriptor.name.as_str();
        self.write_requirements(descriptor).await?;

        let listed = tokio::fs::read_to_string(self.layout.requirements(name)).await?;
        if listed
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#'))
        {
            tracing::debug!("Plugin {} declares no dependencies", name);
            return Ok(String::new());
        }

        if *self.shutdown.borrow() {
            return Err(PluginError::Cancelled(name.to_string()));
        }

        let args: Vec<String> = self.installer.args.iter().map(|a| self.expand(a, name)).collect();
        tracing::info!("Installing requirements for {}: {} {}", name, self.installer.program, args.join(" "));

        let child = Command::new(&self.installer.program)
            .args(&args)
            .current_dir(self.layout.folder(name))
            .env("PLUGBOT_PLUGIN", name)
            .env("PLUGBOT_ENV", self.layout.environment(name))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PluginError::ProvisionFailure {
                plugin: name.to_string(),
                output: format!("failed to start installer '{}': {}", self.installer.program, e),
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout(), child.wait_with_output()) => result,
            _ = shutdown_requested(self.shutdown.clone()) => {
                tracing::warn!("Shutdown requested, killed installer for {}", name);
                return Err(PluginError::Cancelled(name.to_string()));
            }
        };

        let output = match output {
            Err(_) => {
                return Err(PluginError::ProvisionFailure {
                    plugin: name.to_string(),
                    output: format!("installer timed out after {}s", self.installer.timeout_secs),
                })
            }
            Ok(Err(e)) => {
                return Err(PluginError::ProvisionFailure {
                    plugin: name.to_string(),
                    output: format!("installer failed: {}", e),
                })
            }
            Ok(Ok(output)) => output,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(PluginError::ProvisionFailure {
                plugin: name.to_string(),
                output: combined,
            });
        }

        tracing::info!("Installed requirements for {}", name);
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Author, PluginOrigin};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn descriptor(name: &str, requirements: &[&str]) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            description: "test".to_string(),
            author: Author::One("tester".to_string()),
            requirements: requirements.iter().map(|s| s.to_string()).collect(),
            settings: BTreeMap::new(),
            origin: PluginOrigin::Folder(PathBuf::new()),
        }
    }

    fn installer(script: &str) -> InstallerConfig {
        InstallerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_secs: 30,
        }
    }

    fn setup(name: &str, script: &str) -> (TempDir, Provisioner, watch::Sender<bool>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(name)).unwrap();
        let (tx, rx) = watch::channel(false);
        let provisioner = Provisioner::new(PluginLayout::new(dir.path()), installer(script), rx);
        (dir, provisioner, tx)
    }

    #[tokio::test]
    async fn test_ensure_environment_is_idempotent() {
        let (dir, provisioner, _tx) = setup("kibe", "true");

        let env = provisioner.ensure_environment("kibe", false).await.unwrap();
        let marker = EnvironmentMarker::read(&env).unwrap();
        std::fs::write(env.join("lib").join("installed.txt"), "pillow").unwrap();

        provisioner.ensure_environment("kibe", false).await.unwrap();
        assert_eq!(EnvironmentMarker::read(&env).unwrap(), marker);
        assert!(env.join("lib").join("installed.txt").exists());
        assert_eq!(env, dir.path().join("kibe").join("env"));
    }

    #[tokio::test]
    async fn test_overwrite_recreates_environment() {
        let (_dir, provisioner, _tx) = setup("kibe", "true");

        let env = provisioner.ensure_environment("kibe", false).await.unwrap();
        std::fs::write(env.join("lib").join("stale.txt"), "x").unwrap();

        provisioner.ensure_environment("kibe", true).await.unwrap();
        assert!(!env.join("lib").join("stale.txt").exists());
        assert!(EnvironmentMarker::read(&env).is_some());
    }

    #[tokio::test]
    async fn test_existing_requirements_file_is_kept() {
        let (dir, provisioner, _tx) = setup("kibe", "true");
        let path = dir.path().join("kibe").join("requirements.txt");

        assert!(provisioner.write_requirements(&descriptor("kibe", &["pillow>=9"])).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "pillow>=9");

        std::fs::write(&path, "pillow==9.5.0").unwrap();
        assert!(!provisioner.write_requirements(&descriptor("kibe", &["other"])).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "pillow==9.5.0");
    }

    #[tokio::test]
    async fn test_install_runs_installer() {
        let (dir, provisioner, _tx) = setup("kibe", "cp {requirements} {env}/lib/installed.txt && echo done");
        provisioner.ensure_environment("kibe", false).await.unwrap();

        let output = provisioner.install(&descriptor("kibe", &["a==1", "b"])).await.unwrap();
        assert_eq!(output.trim(), "done");
        let installed = dir.path().join("kibe/env/lib/installed.txt");
        assert_eq!(std::fs::read_to_string(installed).unwrap(), "a==1\nb");
    }

    #[tokio::test]
    async fn test_install_skips_empty_dependency_list() {
        let (_dir, provisioner, _tx) = setup("kibe", "exit 1");
        provisioner.ensure_environment("kibe", false).await.unwrap();

        let output = provisioner.install(&descriptor("kibe", &[])).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_carries_output() {
        let (_dir, provisioner, _tx) = setup("kibe", "echo 'no matching distribution' >&2; exit 3");
        provisioner.ensure_environment("kibe", false).await.unwrap();

        let err = provisioner.install(&descriptor("kibe", &["nope"])).await.unwrap_err();
        match err {
            PluginError::ProvisionFailure { plugin, output } => {
                assert_eq!(plugin, "kibe");
                assert!(output.contains("no matching distribution"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_rejects_bad_requirements() {
        let (_dir, provisioner, _tx) = setup("kibe", "true");
        let err = provisioner
            .install(&descriptor("kibe", &["pkg==1.0", "pkg==2.0"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::DependencyParse(_)));
    }

    #[tokio::test]
    async fn test_install_timeout() {
        let (_dir, mut provisioner, _tx) = setup("kibe", "sleep 5");
        provisioner.installer.timeout_secs = 1;
        provisioner.ensure_environment("kibe", false).await.unwrap();

        let err = provisioner.install(&descriptor("kibe", &["slow"])).await.unwrap_err();
        assert!(matches!(err, PluginError::ProvisionFailure { ref output, .. } if output.contains("timed out")));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_installer() {
        let (_dir, provisioner, tx) = setup("kibe", "sleep 10");
        provisioner.ensure_environment("kibe", false).await.unwrap();

        let descriptor = descriptor("kibe", &["slow"]);
        let task = tokio::spawn(async move { provisioner.install(&descriptor).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, PluginError::Cancelled(_)));
    }
}
