//! `rsync-backup`: full system backups with rsync.
//!
//! # Overview
//!
//! Mirrors a source directory into `DESTINATION/latest` with rsync, takes a
//! hard-linked snapshot of it and rotates old snapshots with
//! `rotate-backups`.  Around that it can open an SSH tunnel to a remote rsync
//! daemon, unlock a LUKS device and mount the backup disk, releasing all of
//! it again afterwards.
//!
//! # Usage
//!
//! ```text
//! rsync-backup /mnt/backups/laptop             # backup + snapshot + rotate
//! rsync-backup --backup /home nas::backups     # only transfer /home
//! rsync-backup -m /mnt/backups -c backups /mnt/backups/laptop
//! rsync-backup -t alice@gateway nas::backups   # through an SSH tunnel
//! ```
//!
//! # Module layout
//!
//! | Module         | Responsibility                                    |
//! |----------------|---------------------------------------------------|
//! | [`cli`]        | Flag table parsed by clap                         |
//! | [`options`]    | Routes parsed flags into an `Invocation`          |
//! | [`actions`]    | Explicit action selection                         |
//! | [`destination`]| Destination expressions and tunnel specs          |
//! | [`config`]     | Optional TOML configuration file                  |
//! | [`dispatch`]   | Builds the engine and runs it once                |
//! | [`engine`]     | Tunnel, crypto, mount, rsync, snapshot, rotation  |
//! | [`context`]    | Where commands run (local, over ssh)              |
//! | [`runner`]     | Argument construction helpers                     |
//! | [`ui`]         | Spinner and captured stage execution              |
//! | [`triage`]     | Result → log message + exit code                  |

mod actions;
mod cli;
mod config;
mod context;
mod destination;
mod dispatch;
mod engine;
mod errors;
mod logging;
mod options;
mod runner;
mod triage;
mod ui;

use std::process::ExitCode;

use console::style;
use log::info;

use crate::{
    errors::ParseError,
    options::{Parsed, parse},
};

fn main() -> ExitCode {
    let invocation = match parse(std::env::args_os()) {
        Ok(Parsed::Run(invocation)) => *invocation,
        Ok(Parsed::Usage(text) | Parsed::Help(text)) => {
            print!("{text}");
            return ExitCode::SUCCESS;
        },
        // clap renders its own `error:` prefix and usage hint.
        Err(ParseError::Clap(e)) => {
            eprint!("{e}");
            return ExitCode::FAILURE;
        },
        Err(e) => {
            eprintln!("{} {e}", style("Error:").for_stderr().red().bold());
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = logging::init(invocation.verbosity) {
        eprintln!("{} {e}", style("Warning:").for_stderr().yellow().bold());
    }

    if invocation.options.dry_run {
        info!("Performing a dry run (because of --dry-run option) ...");
    }

    let result = config::load_default().and_then(|config| dispatch::run(invocation, &config));

    let verdict = triage::triage(result, console::user_attended());
    verdict.report();
    verdict.exit_code()
}
