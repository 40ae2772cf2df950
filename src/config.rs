//! Configuration types and loading logic.
//!
//! The configuration file is optional: it only supplies defaults for things
//! the command line didn't set.  Every section has a `Default` impl, so a
//! missing file, an empty file and a file with only some sections all work.
//!
//! # File format
//!
//! ```toml
//! [backup]
//! source   = "/"
//! excludes = ["/dev/*", "/proc/*", "/sys/*", "/tmp/*"]
//! ionice   = "idle"     # idle, best-effort or realtime
//! multi_fs = false
//!
//! [disk]
//! mount_point   = "/mnt/backups"
//! crypto_device = "backups"   # name in /etc/crypttab
//!
//! [rotation]
//! hourly  = 24
//! daily   = 7
//! weekly  = 4
//! monthly = 12
//! yearly  = "always"
//!
//! [notifications]
//! enabled = true
//! ```
//!
//! The file is read from `$RSYNC_BACKUP_CONFIG`, falling back to
//! `~/.config/rsync-backup/config.toml`.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{cli::IoniceClass, errors::BackupError};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_VAR: &str = "RSYNC_BACKUP_CONFIG";

// ─── Top-level ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub disk: DiskConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

// ─── [backup] ─────────────────────────────────────────────────────────────────

/// What to back up and how to transfer it.
#[derive(Debug, Deserialize, Serialize)]
pub struct BackupConfig {
    /// Directory to back up when no SOURCE argument is given.
    #[serde(default = "default_source")]
    pub source: String,

    /// rsync exclude patterns.  Replaced, not extended, by `--exclude`.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub ionice: Option<IoniceClass>,

    #[serde(default)]
    pub multi_fs: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            excludes: default_excludes(),
            ionice: None,
            multi_fs: false,
        }
    }
}

// ─── [disk] ───────────────────────────────────────────────────────────────────

/// Backup disk to unlock and mount before running.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct DiskConfig {
    #[serde(default)]
    pub mount_point: Option<String>,

    #[serde(default)]
    pub crypto_device: Option<String>,
}

// ─── [rotation] ───────────────────────────────────────────────────────────────

/// How many snapshots to keep per period, passed to `rotate-backups`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RotationConfig {
    #[serde(default = "default_hourly")]
    pub hourly: Keep,

    #[serde(default = "default_daily")]
    pub daily: Keep,

    #[serde(default = "default_weekly")]
    pub weekly: Keep,

    #[serde(default = "default_monthly")]
    pub monthly: Keep,

    #[serde(default = "default_yearly")]
    pub yearly: Keep,
}

impl RotationConfig {
    /// `(name, keep)` pairs from the shortest period to the longest.
    pub fn frequencies(&self) -> [(&'static str, &Keep); 5] {
        [
            ("hourly", &self.hourly),
            ("daily", &self.daily),
            ("weekly", &self.weekly),
            ("monthly", &self.monthly),
            ("yearly", &self.yearly),
        ]
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            hourly: default_hourly(),
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_monthly(),
            yearly: default_yearly(),
        }
    }
}

/// Either a number of snapshots or `"always"` (keep every one).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Keep {
    Count(u32),
    Always(Always),
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Always {
    Always,
}

impl fmt::Display for Keep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Always(_) => f.write_str("always"),
        }
    }
}

// ─── [notifications] ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

// ─── Defaults ─────────────────────────────────────────────────────────────────

// `#[serde(default = "…")]` needs free functions for individual fields.

pub fn default_source() -> String {
    "/".into()
}

/// Pseudo filesystems, caches and mount points that never belong in a system
/// backup.
pub fn default_excludes() -> Vec<String> {
    [
        "/dev/*",
        "/home/*/.cache/*",
        "/media/*",
        "/mnt/*",
        "/proc/*",
        "/run/*",
        "/sys/*",
        "/tmp/*",
        "/var/cache/*",
        "/var/tmp/*",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_hourly() -> Keep {
    Keep::Count(24)
}
pub fn default_daily() -> Keep {
    Keep::Count(7)
}
pub fn default_weekly() -> Keep {
    Keep::Count(4)
}
pub fn default_monthly() -> Keep {
    Keep::Count(12)
}
pub fn default_yearly() -> Keep {
    Keep::Always(Always::Always)
}

const fn default_true() -> bool {
    true
}

// ─── Loader ───────────────────────────────────────────────────────────────────

/// Configuration file location: `$RSYNC_BACKUP_CONFIG`, else the per-user
/// config directory.
pub fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_VAR)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs_next::config_dir().map(|d| d.join("rsync-backup").join("config.toml")))
}

/// Loads the configuration from [`config_path`], or defaults.
pub fn load_default() -> Result<Config> {
    match config_path() {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}

/// Read and parse a `Config` from `path`.
///
/// A missing file yields defaults.  A file that exists but can't be read or
/// parsed is an [`BackupError::InvalidConfig`].
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("No configuration file at {}, using defaults.", path.display());
        return Ok(Config::default());
    }

    let invalid = |reason: String| BackupError::InvalidConfig {
        path: path.display().to_string(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let config = toml::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    debug!("Loaded configuration from {}.", path.display());
    Ok(config)
}
