//! Command-line interface definition.
//!
//! Every recognised flag lives on [`Cli`], together with its arity and the
//! `value_parser` that validates it.  Turning the parsed struct into an
//! [`crate::options::Invocation`] is the job of [`crate::options`].

use std::{fmt, str::FromStr};

use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

use crate::{
    destination::{TunnelSpec, parse_tunnel},
    errors::ParseError,
};

/// Top-level CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name    = "rsync-backup",
    about   = "Create backups, snapshots and rotations of a system with rsync",
    long_about = "\
Use rsync to create full system backups.

The backup is written to the `latest` directory of DESTINATION.  Afterwards a \
hard-linked snapshot of `latest` is taken and old snapshots are rotated.  By \
default all three actions run; naming one or more of --backup, --snapshot and \
--rotate runs only those.

DESTINATION may be a local path, a `[USER@]HOST:PATH` remote shell location or \
a rsync daemon module (`[USER@]HOST::MODULE[/PATH]` or \
`rsync://[USER@]HOST[:PORT]/MODULE[/PATH]`).  SOURCE defaults to `/`.  When \
DESTINATION is omitted, $RSYNC_MODULE_PATH is used.",
    version,
    // Repeating a flag keeps the last value instead of failing.
    args_override_self = true,
    help_template = "\
{before-help}{name} {version}
{about}

{usage-heading} {usage}

{all-args}{after-help}"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Create a backup (explicitly).
    #[arg(short, long)]
    pub backup: bool,

    /// Create a snapshot of the latest backup (explicitly).
    #[arg(short, long)]
    pub snapshot: bool,

    /// Rotate old snapshots (explicitly).
    #[arg(short, long)]
    pub rotate: bool,

    /// Mount the backup disk at PATH before running (must be in /etc/fstab).
    #[arg(short, long = "mount", value_name = "PATH")]
    pub mount_point: Option<String>,

    /// Unlock the crypttab target DEVICE before mounting.
    #[arg(short, long = "crypto", value_name = "DEVICE")]
    pub crypto_device: Option<String>,

    /// Reach a remote rsync daemon through an SSH tunnel.
    #[arg(short, long, value_name = "[USER@]ALIAS[:PORT]", value_parser = parse_tunnel)]
    pub tunnel: Option<TunnelSpec>,

    /// I/O scheduling class for rsync: idle, best-effort or realtime.
    #[arg(short, long, value_name = "CLASS", value_parser = parse_ionice_class)]
    pub ionice: Option<IoniceClass>,

    /// Don't use sudo for commands that need root privileges.
    #[arg(short = 'u', long)]
    pub no_sudo: bool,

    /// Only show what would be transferred.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Exclude files matching PATTERN (may be repeated).
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Allow rsync to cross filesystem boundaries.
    #[arg(long)]
    pub multi_fs: bool,

    /// Back up to a local destination outside of the --mount point.
    #[arg(short, long)]
    pub force: bool,

    /// Don't send desktop notifications.
    #[arg(long)]
    pub disable_notifications: bool,

    /// Increase logging verbosity (can be repeated).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Decrease logging verbosity (can be repeated).
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// [SOURCE] DESTINATION
    #[arg(value_name = "ARGS")]
    pub arguments: Vec<String>,
}

// ─── I/O scheduling class ─────────────────────────────────────────────────────

/// Scheduling classes accepted by `ionice --class`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoniceClass {
    Idle,
    BestEffort,
    Realtime,
}

impl IoniceClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BestEffort => "best-effort",
            Self::Realtime => "realtime",
        }
    }
}

impl fmt::Display for IoniceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IoniceClass {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "best-effort" => Ok(Self::BestEffort),
            "realtime" => Ok(Self::Realtime),
            _ => Err(ParseError::IoniceClass(value.to_owned())),
        }
    }
}

/// `value_parser` for `--ionice`.
pub fn parse_ionice_class(value: &str) -> Result<IoniceClass, ParseError> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn make_cli(extra: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rsync-backup").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ionice_is_case_insensitive_and_trimmed() {
        assert_eq!(" Idle ".parse::<IoniceClass>().unwrap(), IoniceClass::Idle);
        assert_eq!(
            "BEST-EFFORT".parse::<IoniceClass>().unwrap(),
            IoniceClass::BestEffort
        );
    }

    #[test]
    fn ionice_rejects_unknown_class() {
        assert!(matches!(
            "invalid".parse::<IoniceClass>(),
            Err(ParseError::IoniceClass(_))
        ));
    }

    #[test]
    fn short_and_long_flags_are_equivalent() {
        let short = make_cli(&["-bsr", "-m", "/mnt/backup", "-c", "backup", "-u", "-n", "-f"]);
        let long = make_cli(&[
            "--backup",
            "--snapshot",
            "--rotate",
            "--mount=/mnt/backup",
            "--crypto=backup",
            "--no-sudo",
            "--dry-run",
            "--force",
        ]);
        assert_eq!(format!("{short:?}"), format!("{long:?}"));
    }

    #[test]
    fn excludes_accumulate_in_order() {
        let cli = make_cli(&["-x", "/tmp/*", "--exclude=/var/cache/*", "-x/proc/*"]);
        assert_eq!(cli.excludes, vec!["/tmp/*", "/var/cache/*", "/proc/*"]);
    }

    #[test]
    fn verbosity_flags_are_counted() {
        let cli = make_cli(&["-vv", "--quiet", "-v"]);
        assert_eq!(cli.verbose, 3);
        assert_eq!(cli.quiet, 1);
    }

    #[test]
    fn repeated_scalar_flag_keeps_last_value() {
        let cli = make_cli(&["--mount=/mnt/a", "--mount=/mnt/b", "-b", "-b"]);
        assert_eq!(cli.mount_point.as_deref(), Some("/mnt/b"));
        assert!(cli.backup);
    }

    #[test]
    fn positionals_mix_with_flags() {
        let cli = make_cli(&["/home", "-n", "/mnt/backup"]);
        assert_eq!(cli.arguments, vec!["/home", "/mnt/backup"]);
        assert!(cli.dry_run);
    }

    #[test]
    fn tunnel_is_parsed_into_a_spec() {
        let cli = make_cli(&["--tunnel=alice@nas:2222"]);
        let spec = cli.tunnel.unwrap();
        assert_eq!(spec.ssh_alias, "nas");
        assert_eq!(spec.port, Some(2222));
    }

    #[test]
    fn invalid_tunnel_port_is_rejected() {
        let result = Cli::try_parse_from(["rsync-backup", "--tunnel=nas:abc"]);
        assert!(result.is_err());
    }
}
