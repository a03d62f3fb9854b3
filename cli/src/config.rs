// Configuration management for the contactlink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/contactlink/config.json
// - Linux: ~/.config/contactlink/config.json
// - Windows: %APPDATA%\contactlink\config.json

use anyhow::{Context, Result};
use contactlink_core::LinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Link manager settings handed to the core
    pub link: LinkConfig,

    /// Application reported as foreground during simulations
    pub foreground_app: String,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Where persisted preferences live (defaults to the data dir)
    pub storage_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            foreground_app: "com.example.browser".to_string(),
            log_level: "warn".to_string(),
            storage_path: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("contactlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("contactlink");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Directory holding the preference database
    pub fn preferences_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("preferences")),
        }
    }

    /// Load config from the default file, or create it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .link
                .validate()
                .context("Config file holds invalid link settings")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The change is validated but not saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "debounce.nothing_to_send_ms" => {
                updated.link.debounce.nothing_to_send_ms =
                    value.parse().context("Invalid number")?;
            }
            "debounce.need_confirmation_ms" => {
                updated.link.debounce.need_confirmation_ms =
                    value.parse().context("Invalid number")?;
            }
            "debounce.sending_ms" => {
                updated.link.debounce.sending_ms = value.parse().context("Invalid number")?;
            }
            "debounce.send_complete_ms" => {
                updated.link.debounce.send_complete_ms =
                    value.parse().context("Invalid number")?;
            }
            "fast_connect_budget_ms" => {
                updated.link.fast_connect_budget_ms = value.parse().context("Invalid number")?;
            }
            "link.miu" => {
                updated.link.link.miu = value.parse().context("Invalid number")?;
            }
            "link.rw" => {
                updated.link.link.rw = value.parse().context("Invalid number")?;
            }
            "handover_supported" => {
                updated.link.handover_supported =
                    value.parse().context("Invalid boolean value")?;
            }
            "store_uri_template" => {
                updated.link.store_uri_template = value.to_string();
            }
            "foreground_app" => {
                updated.foreground_app = value.to_string();
            }
            "log_level" => {
                updated.log_level = value.to_string();
            }
            "storage_path" => {
                updated.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated
            .link
            .validate()
            .with_context(|| format!("Rejected {} = {}", key, value))?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let debounce = &self.link.debounce;
        vec![
            (
                "debounce.nothing_to_send_ms".to_string(),
                debounce.nothing_to_send_ms.to_string(),
            ),
            (
                "debounce.need_confirmation_ms".to_string(),
                debounce.need_confirmation_ms.to_string(),
            ),
            (
                "debounce.sending_ms".to_string(),
                debounce.sending_ms.to_string(),
            ),
            (
                "debounce.send_complete_ms".to_string(),
                debounce.send_complete_ms.to_string(),
            ),
            (
                "fast_connect_budget_ms".to_string(),
                self.link.fast_connect_budget_ms.to_string(),
            ),
            ("link.miu".to_string(), self.link.link.miu.to_string()),
            ("link.rw".to_string(), self.link.link.rw.to_string()),
            (
                "handover_supported".to_string(),
                self.link.handover_supported.to_string(),
            ),
            (
                "store_uri_template".to_string(),
                self.link.store_uri_template.clone(),
            ),
            ("foreground_app".to_string(), self.foreground_app.clone()),
            ("log_level".to_string(), self.log_level.clone()),
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "warn");
        assert!(config.link.validate().is_ok());
        assert_eq!(config.get("debounce.sending_ms").as_deref(), Some("5000"));
    }

    #[test]
    fn test_set_rejects_unordered_debounce() {
        let mut config = Config::default();
        assert!(config.set("debounce.sending_ms", "100").is_err());
        assert_eq!(config.link.debounce.sending_ms, 5000);

        config.set("debounce.sending_ms", "8000").unwrap();
        assert_eq!(config.get("debounce.sending_ms").as_deref(), Some("8000"));
    }

    #[test]
    fn test_set_unknown_key() {
        let mut config = Config::default();
        assert!(config.set("listen_port", "9000").is_err());
        assert!(config.get("listen_port").is_none());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        config.set("foreground_app", "com.example.notes").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.foreground_app, "com.example.notes");
    }
}
