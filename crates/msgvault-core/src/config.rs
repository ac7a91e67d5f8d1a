//! Configuration types and loading for msgvault.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the Messages store (chat.db). Opened read-only.
    pub store_path: PathBuf,

    /// Wall-clock timeout for a single store query, in milliseconds.
    pub query_timeout_ms: u64,

    /// External property-list converter used by the legacy decode tier.
    pub converter: ConverterConfig,

    /// Search bounds.
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        let store_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Messages")
            .join("chat.db");

        Self {
            store_path,
            query_timeout_ms: 10_000,
            converter: ConverterConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.store_path = Self::expand_path(&self.store_path.to_string_lossy());
    }
}

/// External converter invoked for the legacy rich-text decode tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Binary to invoke. The payload is piped through stdin and JSON is read
    /// from stdout.
    pub binary: String,

    /// Wall-clock timeout per invocation, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: "plutil".to_string(),
            timeout_ms: 2_000,
        }
    }
}

/// Bounds for the two-phase search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Result limit applied when the caller does not pass one.
    pub default_limit: i64,

    /// Hard ceiling on the per-request result limit.
    pub max_limit: i64,

    /// Phase-2 candidate pool size per missing result.
    pub fallback_multiplier: i64,

    /// Absolute cap on the phase-2 candidate pool.
    pub fallback_cap: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            fallback_multiplier: 8,
            fallback_cap: 200,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
