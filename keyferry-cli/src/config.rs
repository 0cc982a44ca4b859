//! The `config.toml` file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyferry::EngineConfig;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "keyferry";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where sessions, the ledger and logs live.
    pub state_dir: Option<PathBuf>,
    pub steam_api_key: Option<String>,
    pub log_file: bool,
    pub json_log: bool,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            steam_api_key: None,
            log_file: true,
            json_log: false,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .context("Could not determine the configuration directory")
    }

    fn resolve(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path(),
        }
    }

    /// Load the file, or defaults if it does not exist yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve(path)?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        Self::default().save(path)
    }

    /// TOML rendering with the API key masked.
    pub fn show(&self) -> Result<String> {
        let mut shown = self.clone();
        if let Some(key) = shown.steam_api_key.as_mut() {
            *key = mask(key);
        }
        toml::to_string_pretty(&shown).context("Failed to serialize configuration")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from(".keyferry"))
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}
