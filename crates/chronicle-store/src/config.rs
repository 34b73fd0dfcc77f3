//! Chronicle engine configuration.
//!
//! A `ChronicleConfig` is deserialized from TOML.  Every field has a default,
//! so an empty document is a valid configuration.
//!
//! Example:
//! ```toml
//! root = "/var/lib/agent/chronicle"
//! allowed_extensions = ["ndjson", "jsonl"]
//!
//! [lock]
//! timeout_ms = 10000
//! stale_after_ms = 120000
//! retry_base_ms = 5
//!
//! [repair]
//! backup = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use chronicle_contracts::error::{ChronicleError, ChronicleResult};

use crate::lock::LockOptions;

/// Lock acquisition tuning, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long an append or repair waits for the lock before failing with
    /// `LOCK_TIMEOUT`.
    pub timeout_ms: u64,

    /// Age after which an unheld lock sidecar is swept by `clean-locks`.
    pub stale_after_ms: u64,

    /// Base delay of the exponential retry backoff.
    pub retry_base_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            stale_after_ms: 120_000,
            retry_base_ms: 5,
        }
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            retry_base: Duration::from_millis(self.retry_base_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Copy the original file aside before a repair overwrites it.
    pub backup: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self { backup: true }
    }
}

/// The top-level structure deserialized from a TOML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronicleConfig {
    /// When set, every chronicle path must resolve inside this directory.
    /// Relative chronicle paths are resolved against it.
    pub root: Option<PathBuf>,

    /// Accepted chronicle file extensions, without the leading dot.
    pub allowed_extensions: Vec<String>,

    pub lock: LockConfig,

    pub repair: RepairConfig,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            root: None,
            allowed_extensions: vec!["ndjson".to_string(), "jsonl".to_string()],
            lock: LockConfig::default(),
            repair: RepairConfig::default(),
        }
    }
}

impl ChronicleConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `ChronicleError::Config` if the TOML is malformed or does not
    /// match the expected schema.
    pub fn from_toml_str(s: &str) -> ChronicleResult<Self> {
        let config: ChronicleConfig = toml::from_str(s).map_err(|e| ChronicleError::Config {
            reason: format!("failed to parse chronicle config TOML: {}", e),
        })?;

        if config.allowed_extensions.is_empty() {
            return Err(ChronicleError::Config {
                reason: "allowed_extensions must list at least one extension".to_string(),
            });
        }

        debug!(
            root = ?config.root,
            extensions = ?config.allowed_extensions,
            lock_timeout_ms = config.lock.timeout_ms,
            "chronicle config loaded"
        );
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML configuration.
    pub fn from_file(path: &Path) -> ChronicleResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ChronicleError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builder-style override of the allowed root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn lock_options(&self) -> LockOptions {
        self.lock.options()
    }
}
