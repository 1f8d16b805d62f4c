//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub plugins: PluginConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginConfig {
    pub directory: PathBuf,
    pub auto_load: bool,
    #[serde(default)]
    pub installer: InstallerConfig,
}

/// Command that installs a plugin's dependency list into its environment.
///
/// Arguments may use `{env}`, `{requirements}`, `{plugin}` and `{folder}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: "pip".to_string(),
            args: vec![
                "install".to_string(),
                "--quiet".to_string(),
                "--target".to_string(),
                "{env}/lib".to_string(),
                "--requirement".to_string(),
                "{requirements}".to_string(),
            ],
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: "plugbot".to_string(),
                prefix: ".".to_string(),
            },
            plugins: PluginConfig {
                directory: PathBuf::from("./plugins"),
                auto_load: true,
                installer: InstallerConfig::default(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("plugbot.db"),
            },
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.installer.program.trim().is_empty() {
            return Err(ConfigError::MissingField("plugins.installer.program".to_string()));
        }
        if self.plugins.installer.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "plugins.installer.timeout-secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Environment variables override file values
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("PLUGBOT_PLUGINS_DIR") {
            self.plugins.directory = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("PLUGBOT_DATABASE") {
            self.database.path = PathBuf::from(path);
        }

        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            self.bot.prefix = prefix;
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_yaml() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("auto-load"));
        assert!(yaml.contains("timeout-secs"));

        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.plugins.installer.program, "pip");
    }

    #[test]
    fn test_installer_defaults_when_omitted() {
        let config = Config::parse(
            r#"
bot:
  name: test
  prefix: "!"
plugins:
  directory: /srv/plugins
  auto-load: false
database:
  path: /srv/plugbot.db
"#,
        )
        .unwrap();

        assert_eq!(config.bot.prefix, "!");
        assert_eq!(config.plugins.directory, PathBuf::from("/srv/plugins"));
        assert_eq!(config.plugins.installer.timeout_secs, 600);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = Config::default();
        config.plugins.installer.timeout_secs = 0;
        let yaml = config.to_yaml().unwrap();
        assert!(matches!(Config::parse(&yaml), Err(ConfigError::InvalidValue(_))));
    }
}
