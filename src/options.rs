//! Option aggregation.
//!
//! Parses the raw arguments with [`Cli`] and routes every flag to its target:
//! action flags to [`ActionSet`], the destination argument and `--tunnel` to a
//! [`DestinationDescriptor`], and everything else to the [`OptionBag`].
//!
//! All flag values are validated by clap before any of this runs, so an
//! invalid `--ionice` or `--tunnel` fails before arity, actions or the
//! destination are looked at.

use std::ffi::OsString;

use clap::{CommandFactory, Parser, error::ErrorKind};

use crate::{
    actions::{Action, ActionSet},
    cli::{Cli, IoniceClass},
    context::ContextOptions,
    destination::DestinationDescriptor,
    errors::ParseError,
    logging::Verbosity,
};

/// Environment variable that supplies a default destination (set by the
/// rsync daemon for pre/post-xfer commands).
pub const MODULE_PATH_VAR: &str = "RSYNC_MODULE_PATH";

/// Flag values handed opaquely to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct OptionBag {
    pub source: Option<String>,
    pub actions: ActionSet,
    pub exclude_list: Vec<String>,
    pub mount_point: Option<String>,
    pub crypto_device: Option<String>,
    pub ionice: Option<IoniceClass>,
    pub sudo_enabled: bool,
    pub dry_run: bool,
    pub force: bool,
    pub multi_fs: bool,
    pub notifications_enabled: bool,
}

/// A fully parsed command line, ready for the dispatcher.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub options: OptionBag,
    /// `None` without a destination argument.
    pub destination: Option<DestinationDescriptor>,
    pub context: ContextOptions,
    pub verbosity: Verbosity,
}

#[derive(Debug)]
pub enum Parsed {
    Run(Box<Invocation>),
    /// Nothing to do: no destination given.  Holds the usage text.
    Usage(String),
    /// `--help` or `--version` output.
    Help(String),
}

/// Parses `args` (including the program name) using the process environment.
pub fn parse<I, T>(args: I) -> Result<Parsed, ParseError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let module_path = std::env::var(MODULE_PATH_VAR).ok();
    parse_with_module_path(args, module_path.as_deref())
}

/// Like [`parse`], with `$RSYNC_MODULE_PATH` passed in explicitly.
pub fn parse_with_module_path<I, T>(args: I, module_path: Option<&str>) -> Result<Parsed, ParseError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return Ok(Parsed::Help(e.render().to_string()));
        },
        Err(e) => return Err(e.into()),
    };
    aggregate(cli, module_path)
}

fn aggregate(cli: Cli, module_path: Option<&str>) -> Result<Parsed, ParseError> {
    let mut arguments = cli.arguments;
    if arguments.len() > 2 {
        return Err(ParseError::Arity(arguments.len()));
    }

    let source = if arguments.len() == 2 {
        Some(arguments.remove(0))
    } else {
        None
    };
    let expression = arguments.pop();

    if expression.is_none() && module_path.is_none_or(str::is_empty) {
        return Ok(Parsed::Usage(usage()));
    }

    let explicit = [
        (cli.backup, Action::Backup),
        (cli.snapshot, Action::Snapshot),
        (cli.rotate, Action::Rotate),
    ];
    let actions = ActionSet::from_explicit(
        explicit
            .into_iter()
            .filter_map(|(given, action)| given.then_some(action)),
    );

    // `$RSYNC_MODULE_PATH` is a local path, so `--tunnel` only applies to a
    // destination argument.
    let destination = expression.map(|expression| DestinationDescriptor {
        expression: Some(expression),
        tunnel: cli.tunnel,
    });

    let sudo_enabled = !cli.no_sudo;

    Ok(Parsed::Run(Box::new(Invocation {
        options: OptionBag {
            source,
            actions,
            exclude_list: cli.excludes,
            mount_point: cli.mount_point,
            crypto_device: cli.crypto_device,
            ionice: cli.ionice,
            sudo_enabled,
            dry_run: cli.dry_run,
            force: cli.force,
            multi_fs: cli.multi_fs,
            notifications_enabled: !cli.disable_notifications,
        },
        destination,
        context: ContextOptions { sudo_enabled },
        verbosity: Verbosity::new(cli.verbose, cli.quiet),
    })))
}

/// Help text shown when there is nothing to do.
pub fn usage() -> String {
    Cli::command().render_long_help().to_string()
}
