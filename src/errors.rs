//! Error taxonomy.
//!
//! Two families of errors are recognised by name:
//!
//! - [`ParseError`]: the command line itself is malformed.  Detected while
//!   parsing and reported by `main` without a trace.
//! - [`BackupError`]: an operational failure reported by the engine (the disk
//!   is not plugged in, the destination is unreachable, ...).  These travel
//!   inside `anyhow::Error` and are picked out again by [`crate::triage`].
//!
//! Anything else that reaches the triage step is an unexpected error.

use thiserror::Error;

/// Invalid command line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Expected one or two positional arguments! (got {0})")]
    Arity(usize),

    #[error("invalid I/O scheduling class '{0}' (expected one of: idle, best-effort, realtime)")]
    IoniceClass(String),

    #[error("invalid port number '{port}' in tunnel expression '{expression}'")]
    TunnelPort { expression: String, port: String },

    #[error("missing SSH alias in tunnel expression '{0}'")]
    TunnelAlias(String),

    #[error("{0}")]
    Clap(#[from] clap::Error),
}

/// Operational failure raised by the execution engine.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The backup disk (or the device behind it) isn't available.  Expected
    /// when running from cron with the disk unplugged.
    #[error("{0}")]
    MissingBackupDisk(String),

    #[error("invalid configuration file {path}: {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("no destination given and $RSYNC_MODULE_PATH is not set")]
    MissingDestination,

    #[error("invalid destination '{expression}': {reason}")]
    InvalidDestination { expression: String, reason: String },

    #[error("crypto device '{name}': {reason}")]
    Crypttab { name: String, reason: String },

    #[error("failed to establish SSH tunnel to {alias}: {reason}")]
    Tunnel { alias: String, reason: String },

    #[error("{stage} failed: {detail}")]
    StageFailed { stage: String, detail: String },
}

impl BackupError {
    pub const fn is_missing_disk(&self) -> bool {
        matches!(self, Self::MissingBackupDisk(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_message_names_the_count() {
        assert_eq!(
            ParseError::Arity(3).to_string(),
            "Expected one or two positional arguments! (got 3)"
        );
    }

    #[test]
    fn only_missing_disk_is_missing_disk() {
        assert!(BackupError::MissingBackupDisk("gone".into()).is_missing_disk());
        assert!(!BackupError::MissingDestination.is_missing_disk());
        assert!(
            !BackupError::StageFailed {
                stage: "Backup".into(),
                detail: "exit 23".into(),
            }
            .is_missing_disk()
        );
    }
}
