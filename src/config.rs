//! Configuration for the windowed metrics store
//!
//! Configuration is an explicit struct handed to store, registry, and
//! scheduler constructors; there is no process-wide settings singleton.
//! TOML files, environment-variable overrides, and validated defaults are
//! supported.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Window store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Analysis graph scheduling configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Window store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path prefix for window store files. Each window resolves to
    /// `<file_prefix><window_start>` with no separator; the listing path
    /// relies on exactly this naming to recover windows after a restart.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: PathBuf,

    /// Number of most-recent windows the retention sweep keeps on disk
    #[serde(default = "default_retention_windows")]
    pub retention_windows: usize,
}

/// Analysis graph scheduling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Scheduler tick interval in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

// Default value functions
fn default_file_prefix() -> PathBuf {
    let mut prefix = std::env::temp_dir().into_os_string();
    prefix.push("/thermograph_");
    PathBuf::from(prefix)
}
fn default_retention_windows() -> usize {
    12
}
fn default_tick_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_prefix: default_file_prefix(),
            retention_windows: default_retention_windows(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

impl StorageConfig {
    /// Resolve the on-disk path of one window's store file
    pub fn file_path(&self, window_start: u64) -> PathBuf {
        let mut path = self.file_prefix.clone().into_os_string();
        path.push(window_start.to_string());
        PathBuf::from(path)
    }

    /// Create a config rooted at the given prefix (tests, embedding)
    pub fn with_prefix(file_prefix: impl Into<PathBuf>) -> Self {
        Self {
            file_prefix: file_prefix.into(),
            ..Self::default()
        }
    }
}

impl AnalysisConfig {
    /// Scheduler tick as a [`Duration`]
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides applied
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(prefix) = std::env::var("THERMOGRAPH_FILE_PREFIX") {
            self.storage.file_prefix = PathBuf::from(prefix);
        }
        if let Ok(retention) = std::env::var("THERMOGRAPH_RETENTION_WINDOWS") {
            if let Ok(n) = retention.parse() {
                self.storage.retention_windows = n;
            }
        }
        if let Ok(tick) = std::env::var("THERMOGRAPH_TICK_SECS") {
            if let Ok(secs) = tick.parse() {
                self.analysis.tick_secs = secs;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.storage.file_prefix.as_os_str().is_empty() {
            return Err("File prefix cannot be empty".to_string());
        }
        if self.storage.file_prefix.file_name().is_none() {
            return Err("File prefix must end in a file-name component".to_string());
        }
        if self.storage.retention_windows == 0 {
            return Err("Retention must keep at least one window".to_string());
        }
        if self.analysis.tick_secs == 0 {
            return Err("Scheduler tick must be at least one second".to_string());
        }
        Ok(())
    }
}
