//! Runtime configuration and on-disk layout for the tracker.
//!
//! All detection thresholds live here. They are tuned empirically against one
//! host page and are configuration, not protocol guarantees.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Quiet period a mutation burst must hold before a scan is scheduled.
    pub debounce_quiet_ms: u64,
    /// Unconditional rescan interval; backstop against missed mutations.
    pub poll_interval_ms: u64,
    /// How often the end-of-meeting detector evaluates its signals.
    pub end_check_interval_ms: u64,
    /// Consecutive end-detector checks without meeting controls before the
    /// meeting is considered over. Controls transiently vanish on re-render,
    /// so this is a counter, not an instant trigger.
    pub controls_missing_threshold: u32,
    /// Warmup attempts to see a participant node while the panel is open.
    pub warmup_max_attempts: u32,
    pub warmup_retry_ms: u64,
    /// Backoff between attempts to locate the panel-open control.
    pub panel_open_backoff_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce_quiet_ms: 500,
            poll_interval_ms: 5_000,
            end_check_interval_ms: 2_000,
            controls_missing_threshold: 3,
            warmup_max_attempts: 30,
            warmup_retry_ms: 1_000,
            panel_open_backoff_ms: 10_000,
        }
    }
}

/// Loads the tracker config, falling back to defaults when the file is
/// missing. A malformed file is an error; silently ignoring it would hide
/// typos in tuned thresholds.
pub fn load_config(path: Option<PathBuf>) -> Result<TrackerConfig> {
    let config_path = match path {
        Some(path) => path,
        None => RosterPaths::resolve()?.config_file(),
    };

    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(|err| TrackerError::Io {
        context: format!("read config {}", config_path.display()),
        source: err,
    })?;
    toml::from_str::<TrackerConfig>(&content).map_err(|err| TrackerError::ConfigMalformed {
        path: config_path,
        details: err.to_string(),
    })
}

/// Filesystem layout under the roster home directory (`~/.roster` by default,
/// overridable for tests via `$HOME`).
#[derive(Debug, Clone)]
pub struct RosterPaths {
    root: PathBuf,
}

impl RosterPaths {
    pub fn resolve() -> Result<Self> {
        let home = dirs::home_dir().ok_or(TrackerError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(".roster"),
        })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("tracker.toml")
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.root.join("spool")
    }

    pub fn registry_socket(&self) -> PathBuf {
        self.root.join("registry.sock")
    }

    pub fn tracker_socket(&self) -> PathBuf {
        self.root.join("tracker.sock")
    }

    pub fn registry_db(&self) -> PathBuf {
        self.root.join("registry").join("sessions.db")
    }

    pub fn registry_backoff_file(&self) -> PathBuf {
        self.root.join("registry").join("registry-backoff.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
