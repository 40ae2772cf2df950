//! Execution engine: turns a resolved invocation into rsync, cp and
//! rotate-backups runs.
//!
//! # Steps (in order)
//!
//! | # | Step     | When                                   |
//! |---|----------|----------------------------------------|
//! | 1 | Tunnel   | `--tunnel` given (daemon destinations) |
//! | 2 | Unlock   | crypto device configured               |
//! | 3 | Mount    | mount point configured                 |
//! | 4 | Backup   | backup action enabled                  |
//! | 5 | Snapshot | snapshot action enabled                |
//! | 6 | Rotate   | rotate action enabled                  |
//! | 7 | Release  | whatever steps 1-3 acquired            |
//! | 8 | Notify   | notifications enabled, not a dry run   |
//!
//! The first failing step aborts the run.  Steps 1-3 hand out guards, so
//! the disk is unmounted and locked again and the tunnel closed on every
//! exit path.

pub mod disk;
pub mod tunnel;

use std::path::Path;

use anyhow::Result;
use log::{info, warn};

use self::{disk::Acquired, tunnel::Tunnel};
use crate::{
    actions::{Action, ActionSet},
    cli::IoniceClass,
    config::{Config, RotationConfig},
    context::{ExecutionContext, RemoteContext},
    destination::{DestinationDescriptor, Location, TunnelSpec, join},
    errors::BackupError,
    options::{MODULE_PATH_VAR, OptionBag},
    runner::{
        TransferOptions, ionice_prefix, mkdir_args, notify_args, rotate_args, rsync_args,
        snapshot_args, snapshot_name,
    },
};

/// Runs a backup exactly once.
pub trait Engine {
    fn execute(&mut self) -> Result<()>;
}

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Command-line options with the configuration file filled in underneath.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct BackupSettings {
    pub excludes: Vec<String>,
    pub mount_point: Option<String>,
    pub crypto_device: Option<String>,
    pub ionice: Option<IoniceClass>,
    pub dry_run: bool,
    pub force: bool,
    pub multi_fs: bool,
    pub notifications_enabled: bool,
    pub rotation: RotationConfig,
}

impl BackupSettings {
    /// Command-line values win.  `-x` patterns replace the configured list.
    pub fn merge(options: &OptionBag, config: &Config) -> Self {
        let excludes = if options.exclude_list.is_empty() {
            config.backup.excludes.clone()
        } else {
            options.exclude_list.clone()
        };

        Self {
            excludes,
            mount_point: options
                .mount_point
                .clone()
                .or_else(|| config.disk.mount_point.clone()),
            crypto_device: options
                .crypto_device
                .clone()
                .or_else(|| config.disk.crypto_device.clone()),
            ionice: options.ionice.or(config.backup.ionice),
            dry_run: options.dry_run,
            force: options.force,
            multi_fs: options.multi_fs || config.backup.multi_fs,
            notifications_enabled: options.notifications_enabled && config.notifications.enabled,
            rotation: config.rotation.clone(),
        }
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Everything the dispatcher hands to an engine.
pub struct EngineParams {
    pub source: String,
    pub source_context: Box<dyn ExecutionContext>,
    pub actions: ActionSet,
    pub destination: Option<DestinationDescriptor>,
    pub settings: BackupSettings,
}

pub struct RsyncBackup {
    params: EngineParams,
    module_path: Option<String>,
}

impl RsyncBackup {
    /// Reads the fallback destination from `$RSYNC_MODULE_PATH`.
    pub fn new(params: EngineParams) -> Self {
        Self::with_module_path(params, std::env::var(MODULE_PATH_VAR).ok())
    }

    pub const fn with_module_path(params: EngineParams, module_path: Option<String>) -> Self {
        Self {
            params,
            module_path,
        }
    }

    fn location(&self) -> Result<Location, BackupError> {
        let expression = self
            .params
            .destination
            .as_ref()
            .and_then(|d| d.expression.as_deref());

        match expression {
            Some(expression) => Location::parse(expression),
            None => match self.module_path.as_deref().filter(|p| !p.is_empty()) {
                Some(path) => Ok(Location::Local {
                    path: path.to_owned(),
                }),
                None => Err(BackupError::MissingDestination),
            },
        }
    }

    fn tunnel_spec(&self) -> Option<&TunnelSpec> {
        self.params.destination.as_ref()?.tunnel.as_ref()
    }

    /// A local destination outside the mount point would silently fill up
    /// the root filesystem when the disk isn't mounted.
    fn check_mount_point(&self, location: &Location) -> Result<(), BackupError> {
        let settings = &self.params.settings;
        let (Some(mount_point), Location::Local { path }) = (&settings.mount_point, location)
        else {
            return Ok(());
        };
        if settings.force || Path::new(path).starts_with(mount_point) {
            return Ok(());
        }
        Err(BackupError::InvalidDestination {
            expression: path.clone(),
            reason: format!("not located under the mount point {mount_point} (use --force to override)"),
        })
    }

    fn context(&self) -> &dyn ExecutionContext {
        self.params.source_context.as_ref()
    }

    /// Where snapshot and rotate commands for `location` run.
    fn destination_shell(&self, location: &Location) -> Option<DestinationShell<'_>> {
        match location {
            Location::Local { path } => Some(DestinationShell {
                context: Shell::Source(self.context()),
                directory: path.clone(),
            }),
            Location::Shell { user, host, path } => Some(DestinationShell {
                context: Shell::Remote(RemoteContext::new(user.as_deref(), host)),
                directory: path.clone(),
            }),
            Location::Daemon { .. } => None,
        }
    }

    // ── steps ─────────────────────────────────────────────────────────────────

    fn transfer(&self, location: &Location, tunnel: Option<&Tunnel>) -> Result<()> {
        let settings = &self.params.settings;

        if !settings.dry_run {
            if let Some(shell) = self.destination_shell(location) {
                let latest = join(&shell.directory, "latest");
                let ctx = shell.context.get();
                ctx.run("Prepare destination", &ctx.command(mkdir_args(&latest), true))
                    .into_result()?;
            }
        }

        let target = location.rsync_target(tunnel.map(Tunnel::local_port));
        let opts = TransferOptions {
            excludes: &settings.excludes,
            multi_fs: settings.multi_fs,
            dry_run: settings.dry_run,
        };
        let mut argv = ionice_prefix(settings.ionice);
        argv.extend(rsync_args(&self.params.source, &target, &opts));

        let ctx = self.context();
        ctx.run("Backup", &ctx.command(argv, true)).into_result()?;
        Ok(())
    }

    /// Snapshot and rotate need a shell next to the destination directory.
    /// Daemon destinations have none: asking for either explicitly is an
    /// error, the implicit "everything" run just leaves them out.
    fn check_shell_access(&self, location: &Location) -> Result<(), BackupError> {
        if !location.is_daemon() {
            return Ok(());
        }
        let actions = &self.params.actions;
        let requested: Vec<String> = [Action::Snapshot, Action::Rotate]
            .into_iter()
            .filter(|&action| actions.is_explicit(action))
            .map(|action| action.to_string())
            .collect();
        if requested.is_empty() {
            return Ok(());
        }
        Err(BackupError::InvalidDestination {
            expression: describe(location),
            reason: format!(
                "cannot {}: rsync daemon destinations have no shell access",
                requested.join(" or ")
            ),
        })
    }

    /// Returns whether a snapshot was taken.
    fn snapshot(&self, location: &Location) -> Result<bool> {
        let Some(shell) = self.destination_shell(location) else {
            warn!("Not creating a snapshot: rsync daemon destinations have no shell access.");
            return Ok(false);
        };

        let name = snapshot_name(&chrono::Local::now());
        let ctx = shell.context.get();
        let argv = ctx.command(snapshot_args(&shell.directory, &name), true);

        if self.params.settings.dry_run {
            info!("Would create snapshot {name} (dry run).");
            return Ok(true);
        }
        ctx.run(&format!("Snapshot {name}"), &argv).into_result()?;
        Ok(true)
    }

    /// Returns whether rotate-backups ran.
    fn rotate(&self, location: &Location) -> Result<bool> {
        let Some(shell) = self.destination_shell(location) else {
            warn!("Not rotating snapshots: rsync daemon destinations have no shell access.");
            return Ok(false);
        };

        let settings = &self.params.settings;
        let ctx = shell.context.get();
        let argv = ctx.command(
            rotate_args(
                &shell.directory,
                &settings.rotation,
                settings.ionice,
                settings.dry_run,
            ),
            true,
        );
        ctx.run("Rotate snapshots", &argv).into_result()?;
        Ok(true)
    }

    fn notify(&self, completed: &[Action], location: &Location) {
        let settings = &self.params.settings;
        if !settings.notifications_enabled || settings.dry_run || completed.is_empty() {
            return;
        }

        let done: Vec<String> = completed.iter().map(ToString::to_string).collect();
        let body = format!(
            "Finished {} of {} to {}.",
            done.join(", "),
            self.params.source,
            describe(location)
        );
        let ctx = self.context();
        let argv = ctx.command(notify_args("Backup finished", &body), false);
        if let Err(e) = ctx.run("Notify", &argv).into_result() {
            warn!("Failed to send desktop notification: {e}");
        }
    }
}

impl Engine for RsyncBackup {
    fn execute(&mut self) -> Result<()> {
        let location = self.location()?;
        let tunnel_spec = self.tunnel_spec();

        if tunnel_spec.is_some() && !location.is_daemon() {
            return Err(BackupError::InvalidDestination {
                expression: describe(&location),
                reason: "an SSH tunnel needs an rsync daemon destination".to_owned(),
            }
            .into());
        }
        self.check_mount_point(&location)?;
        self.check_shell_access(&location)?;

        let settings = &self.params.settings;
        let ctx = self.context();

        // Dropped in reverse order of acquisition at the end of this scope.
        let tunnel = tunnel_spec.map(Tunnel::open).transpose()?;
        let unlocked: Option<Acquired<'_>> = match &settings.crypto_device {
            Some(name) => disk::unlock_device(ctx, name)?,
            None => None,
        };
        let mounted: Option<Acquired<'_>> = match &settings.mount_point {
            Some(mount_point) => disk::mount(ctx, mount_point)?,
            None => None,
        };

        let actions = self.params.actions;
        let mut completed = Vec::new();
        if actions.enabled(Action::Backup) {
            self.transfer(&location, tunnel.as_ref())?;
            completed.push(Action::Backup);
        }
        if actions.enabled(Action::Snapshot) && self.snapshot(&location)? {
            completed.push(Action::Snapshot);
        }
        if actions.enabled(Action::Rotate) && self.rotate(&location)? {
            completed.push(Action::Rotate);
        }

        drop(mounted);
        drop(unlocked);
        drop(tunnel);

        self.notify(&completed, &location);
        Ok(())
    }
}

// ─── Destination shell ────────────────────────────────────────────────────────

enum Shell<'a> {
    Source(&'a dyn ExecutionContext),
    Remote(RemoteContext),
}

impl Shell<'_> {
    fn get(&self) -> &dyn ExecutionContext {
        match self {
            Self::Source(context) => *context,
            Self::Remote(context) => context,
        }
    }
}

struct DestinationShell<'a> {
    context: Shell<'a>,
    /// Directory holding `latest` and the snapshots.
    directory: String,
}

fn describe(location: &Location) -> String {
    match location {
        Location::Local { path } => path.clone(),
        Location::Shell { host, path, .. } => format!("{host}:{path}"),
        Location::Daemon {
            host, module, path, ..
        } => format!("{host}::{}", join(module, path).trim_end_matches('/')),
    }
}
