//! Maps the result of a run to a log message and an exit code.
//!
//! | Result                              | Level | Exit |
//! |-------------------------------------|-------|------|
//! | success                             | -     | 0    |
//! | missing disk, nobody watching       | info  | 0    |
//! | missing disk, interactive           | error | 1    |
//! | any other [`BackupError`]           | error | 1    |
//! | anything else                       | error | 1    |
//!
//! Only the last row carries a diagnostic: the anyhow cause chain.  anyhow
//! captures a backtrace only when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE`
//! is set, so without either the chain is all there is.
//!
//! A missing disk is expected when the backup runs from cron while the disk
//! is unplugged, so it stays quiet unless somebody is watching.

use std::{ffi::OsStr, process::ExitCode};

use anyhow::Result;
use log::Level;

use crate::errors::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Skipped,
    DomainFailure,
    UnexpectedFailure,
}

#[derive(Debug)]
pub struct Verdict {
    pub outcome: Outcome,
    pub level: Level,
    /// `None` when there's nothing to report.
    pub message: Option<String>,
    pub with_trace: bool,
}

impl Verdict {
    pub const fn code(&self) -> u8 {
        match self.outcome {
            Outcome::Success | Outcome::Skipped => 0,
            Outcome::DomainFailure | Outcome::UnexpectedFailure => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    pub fn report(&self) {
        let Some(message) = &self.message else {
            return;
        };
        log::log!(self.level, "{message}");
        if self.with_trace && !backtrace_enabled() {
            log::debug!("Run with RUST_BACKTRACE=1 to include a backtrace.");
        }
    }
}

/// Whether anyhow captures backtraces in this process.
fn backtrace_enabled() -> bool {
    backtrace_setting(
        std::env::var_os("RUST_LIB_BACKTRACE").as_deref(),
        std::env::var_os("RUST_BACKTRACE").as_deref(),
    )
}

/// `RUST_LIB_BACKTRACE` wins over `RUST_BACKTRACE`; `0` disables.
fn backtrace_setting(lib: Option<&OsStr>, rust: Option<&OsStr>) -> bool {
    lib.or(rust).is_some_and(|value| value != "0")
}

/// Classifies `result`.  `interactive` is whether a user is watching.
pub fn triage(result: Result<()>, interactive: bool) -> Verdict {
    let err = match result {
        Ok(()) => {
            return Verdict {
                outcome: Outcome::Success,
                level: Level::Info,
                message: None,
                with_trace: false,
            };
        },
        Err(err) => err,
    };

    match err.downcast_ref::<BackupError>() {
        Some(e) if e.is_missing_disk() && !interactive => Verdict {
            outcome: Outcome::Skipped,
            level: Level::Info,
            message: Some(format!("Skipping backup: {e}")),
            with_trace: false,
        },
        Some(e) => Verdict {
            outcome: Outcome::DomainFailure,
            level: Level::Error,
            message: Some(format!("Aborting due to error: {e}")),
            with_trace: false,
        },
        None => Verdict {
            outcome: Outcome::UnexpectedFailure,
            level: Level::Error,
            message: Some(format!("Aborting due to unhandled error!\n{err:?}")),
            with_trace: true,
        },
    }
}
