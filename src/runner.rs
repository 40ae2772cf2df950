//! Command argument construction helpers.
//!
//! This module is responsible for *building* the argument lists of every
//! external program the engine drives.  It does not execute anything, so
//! every function here is pure and unit-testable without spawning processes.

use crate::{
    cli::IoniceClass,
    config::RotationConfig,
    destination::{TunnelSpec, join},
};

/// Pattern matching snapshot directory names (see [`snapshot_name`]).
pub const SNAPSHOT_PATTERN: &str = "????-??-?? ??:??:??";

/// `strftime` format of snapshot directory names.
pub const SNAPSHOT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─── Privilege prefix ─────────────────────────────────────────────────────────

/// Returns `["sudo"]` when `sudo` is set, otherwise an empty `Vec`.
pub fn prefix(sudo: bool) -> Vec<String> {
    if sudo { vec!["sudo".into()] } else { vec![] }
}

/// `ionice --class <class>` prefix, empty without a class.
pub fn ionice_prefix(class: Option<IoniceClass>) -> Vec<String> {
    match class {
        Some(class) => vec!["ionice".into(), "--class".into(), class.to_string()],
        None => vec![],
    }
}

// ─── rsync ────────────────────────────────────────────────────────────────────

/// Everything the transfer needs besides source and target.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions<'a> {
    pub excludes: &'a [String],
    pub multi_fs: bool,
    pub dry_run: bool,
}

/// `rsync` invocation mirroring `source` into `target`.
///
/// `source` gets a trailing slash so rsync copies its contents rather than the
/// directory itself.
pub fn rsync_args(source: &str, target: &str, opts: &TransferOptions<'_>) -> Vec<String> {
    let mut cmd: Vec<String> = [
        "rsync",
        "--archive",
        "--hard-links",
        "--acls",
        "--xattrs",
        "--numeric-ids",
        "--delete",
        "--delete-excluded",
        "--verbose",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if !opts.multi_fs {
        cmd.push("--one-file-system".into());
    }
    if opts.dry_run {
        cmd.push("--dry-run".into());
    }
    for pattern in opts.excludes {
        cmd.push(format!("--exclude={pattern}"));
    }

    let source = if source.ends_with('/') {
        source.to_owned()
    } else {
        format!("{source}/")
    };
    cmd.extend([source, target.to_owned()]);
    cmd
}

// ─── Snapshots and rotation ───────────────────────────────────────────────────

/// Name of a snapshot taken at `time`.
pub fn snapshot_name<Tz>(time: &chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    time.format(SNAPSHOT_FORMAT).to_string()
}

/// Hard-link copy of `<directory>/latest` into `<directory>/<name>`.
pub fn snapshot_args(directory: &str, name: &str) -> Vec<String> {
    vec![
        "cp".into(),
        "--archive".into(),
        "--link".into(),
        join(directory, "latest"),
        join(directory, name),
    ]
}

/// `rotate-backups` over the snapshots in `directory`.
pub fn rotate_args(
    directory: &str,
    rotation: &RotationConfig,
    ionice: Option<IoniceClass>,
    dry_run: bool,
) -> Vec<String> {
    let mut cmd: Vec<String> = vec!["rotate-backups".into()];
    for (name, keep) in rotation.frequencies() {
        cmd.push(format!("--{name}={keep}"));
    }
    cmd.push(format!("--include={SNAPSHOT_PATTERN}"));
    if let Some(class) = ionice {
        cmd.push(format!("--ionice={class}"));
    }
    if dry_run {
        cmd.push("--dry-run".into());
    }
    cmd.push(directory.to_owned());
    cmd
}

// ─── Disks ────────────────────────────────────────────────────────────────────

pub fn mount_args(mount_point: &str) -> Vec<String> {
    vec!["mount".into(), mount_point.into()]
}

pub fn umount_args(mount_point: &str) -> Vec<String> {
    vec!["umount".into(), mount_point.into()]
}

pub fn cryptdisks_start_args(name: &str) -> Vec<String> {
    vec!["cryptdisks_start".into(), name.into()]
}

pub fn cryptdisks_stop_args(name: &str) -> Vec<String> {
    vec!["cryptdisks_stop".into(), name.into()]
}

pub fn mkdir_args(directory: &str) -> Vec<String> {
    vec!["mkdir".into(), "-p".into(), directory.into()]
}

// ─── ssh ──────────────────────────────────────────────────────────────────────

/// `ssh` forwarding `local_port` to the remote rsync daemon, without running a
/// remote command.
pub fn tunnel_args(spec: &TunnelSpec, local_port: u16) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "ssh".into(),
        "-N".into(),
        "-o".into(),
        "ExitOnForwardFailure=yes".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-L".into(),
        format!("{local_port}:localhost:{}", spec.remote_port),
    ];
    if let Some(port) = spec.port {
        cmd.extend(["-p".into(), port.to_string()]);
    }
    if !spec.ssh_user.is_empty() {
        cmd.extend(["-l".into(), spec.ssh_user.clone()]);
    }
    cmd.push(spec.ssh_alias.clone());
    cmd
}

/// Runs `argv` on `target` (`[user@]host`).  ssh hands the command to a
/// remote shell, so arguments are quoted where needed.
pub fn remote_command(target: &str, argv: &[String]) -> Vec<String> {
    vec![
        "ssh".into(),
        target.into(),
        "--".into(),
        shell_words::join(argv),
    ]
}

// ─── Notifications ────────────────────────────────────────────────────────────

pub fn notify_args(summary: &str, body: &str) -> Vec<String> {
    vec![
        "notify-send".into(),
        "--app-name=rsync-backup".into(),
        summary.into(),
        body.into(),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn transfer(excludes: &[String]) -> TransferOptions<'_> {
        TransferOptions {
            excludes,
            multi_fs: false,
            dry_run: false,
        }
    }

    // ── prefix ────────────────────────────────────────────────────────────────

    #[test]
    fn prefix_empty_without_sudo() {
        assert!(prefix(false).is_empty());
    }

    #[test]
    fn prefix_sudo_with_sudo() {
        assert_eq!(prefix(true), vec!["sudo"]);
    }

    #[test]
    fn ionice_prefix_uses_class_name() {
        assert!(ionice_prefix(None).is_empty());
        assert_eq!(ionice_prefix(Some(IoniceClass::BestEffort)), vec![
            "ionice",
            "--class",
            "best-effort"
        ]);
    }

    // ── rsync ─────────────────────────────────────────────────────────────────

    #[test]
    fn rsync_appends_slash_to_source() {
        let args = rsync_args("/home", "/mnt/latest/", &transfer(&[]));
        assert_eq!(&args[args.len() - 2..], ["/home/", "/mnt/latest/"]);

        let args = rsync_args("/", "/mnt/latest/", &transfer(&[]));
        assert_eq!(args[args.len() - 2], "/");
    }

    #[test]
    fn rsync_excludes_keep_their_order() {
        let excludes = vec!["/proc/*".to_owned(), "/tmp/*".to_owned()];
        let args = rsync_args("/", "t/", &transfer(&excludes));
        let found: Vec<_> = args.iter().filter(|a| a.starts_with("--exclude=")).collect();
        assert_eq!(found, ["--exclude=/proc/*", "--exclude=/tmp/*"]);
    }

    #[test]
    fn rsync_multi_fs_drops_one_file_system() {
        let opts = TransferOptions {
            excludes: &[],
            multi_fs: true,
            dry_run: true,
        };
        let args = rsync_args("/", "t/", &opts);
        assert!(!args.contains(&"--one-file-system".to_string()));
        assert!(args.contains(&"--dry-run".to_string()));
    }

    #[test]
    fn snapshot_rsync_default() {
        let excludes = vec!["/dev/*".to_owned()];
        insta::assert_debug_snapshot!(rsync_args("/", "/mnt/backup/latest/", &transfer(&excludes)), @r#"
        [
            "rsync",
            "--archive",
            "--hard-links",
            "--acls",
            "--xattrs",
            "--numeric-ids",
            "--delete",
            "--delete-excluded",
            "--verbose",
            "--one-file-system",
            "--exclude=/dev/*",
            "/",
            "/mnt/backup/latest/",
        ]
        "#);
    }

    // ── snapshots and rotation ────────────────────────────────────────────────

    #[test]
    fn snapshot_name_matches_pattern() {
        let time = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = snapshot_name(&time);
        assert_eq!(name, "2024-03-09 07:05:01");
        assert_eq!(name.len(), SNAPSHOT_PATTERN.len());
    }

    #[test]
    fn snapshot_links_latest() {
        assert_eq!(snapshot_args("/mnt/backup/", "2024-03-09 07:05:01"), vec![
            "cp",
            "--archive",
            "--link",
            "/mnt/backup/latest",
            "/mnt/backup/2024-03-09 07:05:01",
        ]);
    }

    #[test]
    fn snapshot_rotate_default() {
        insta::assert_debug_snapshot!(
            rotate_args("/mnt/backup", &RotationConfig::default(), Some(IoniceClass::Idle), true),
            @r#"
        [
            "rotate-backups",
            "--hourly=24",
            "--daily=7",
            "--weekly=4",
            "--monthly=12",
            "--yearly=always",
            "--include=????-??-?? ??:??:??",
            "--ionice=idle",
            "--dry-run",
            "/mnt/backup",
        ]
        "#
        );
    }

    // ── ssh ───────────────────────────────────────────────────────────────────

    #[test]
    fn tunnel_args_full() {
        let spec: TunnelSpec = "alice@nas:2222".parse().unwrap();
        insta::assert_debug_snapshot!(tunnel_args(&spec, 40000), @r#"
        [
            "ssh",
            "-N",
            "-o",
            "ExitOnForwardFailure=yes",
            "-o",
            "BatchMode=yes",
            "-L",
            "40000:localhost:873",
            "-p",
            "2222",
            "-l",
            "alice",
            "nas",
        ]
        "#);
    }

    #[test]
    fn tunnel_args_alias_only() {
        let spec: TunnelSpec = "nas".parse().unwrap();
        let args = tunnel_args(&spec, 40000);
        assert!(!args.contains(&"-p".to_string()));
        assert!(!args.contains(&"-l".to_string()));
        assert_eq!(args.last().unwrap(), "nas");
    }

    #[test]
    fn remote_command_survives_the_remote_shell() {
        let argv: Vec<String> = ["rotate-backups", "--include=????-??-?? ??:??:??", "it's mine", ""]
            .map(String::from)
            .to_vec();
        let ssh = remote_command("root@nas", &argv);
        assert_eq!(ssh[..3], ["ssh", "root@nas", "--"]);
        assert_eq!(shell_words::split(&ssh[3]).unwrap(), argv);
    }
}
