//! Kernel session configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for launching a kernel session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Path to the kernel wrapper binary.
    pub interpreter: PathBuf,
    /// Extra arguments passed to the wrapper.
    pub args: Vec<String>,
    /// Working directory for the interpreter; defaults to the caller's.
    pub working_dir: Option<PathBuf>,
    /// Environment snapshot settings.
    pub snapshot: SnapshotConfig,
    /// Timeout settings.
    pub timeouts: TimeoutConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("statkernel"),
            args: Vec::new(),
            working_dir: None,
            snapshot: SnapshotConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Saved-environment snapshot settings.
///
/// The snapshot file is written on request and read only while
/// re-initializing a session after a crash or restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshot file path; `None` disables snapshots.
    pub file: Option<PathBuf>,
    /// Load the snapshot when a session starts.
    pub load_on_start: bool,
    /// Save the snapshot when a session is closed normally.
    pub save_on_exit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Grace period before the kernel process is force-killed.
    pub terminate_secs: u64,
    /// How long an interrupt may take to bring the console back to a
    /// prompt before the UI reports it as stuck.
    pub interrupt_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            terminate_secs: 5,
            interrupt_secs: 10,
        }
    }
}

impl KernelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Default config file location under the user's config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kernel-console").join("config.toml"))
    }

    /// Load the default config file, falling back to defaults if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for an existing but unreadable/invalid file.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
