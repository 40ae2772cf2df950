//! Backup disk handling: unlocking crypto devices and mounting.
//!
//! # How it works
//!
//! 1. A crypto device is considered unlocked when `/dev/mapper/<name>` exists.
//!    Otherwise its source device is looked up in `/etc/crypttab`; if that
//!    device isn't present the disk is simply not plugged in, which is
//!    reported as [`BackupError::MissingBackupDisk`].  Else
//!    `cryptdisks_start <name>` unlocks it.
//! 2. A mount point is considered mounted when it is listed in `/proc/mounts`.
//!    Otherwise `mount <mount point>` is run (so it has to be in `/etc/fstab`);
//!    a failing mount is again a missing disk.
//!
//! Whatever this run unlocked or mounted is handed back as an [`Acquired`]
//! guard which locks or unmounts it again when dropped.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};

use crate::{
    context::ExecutionContext,
    errors::BackupError,
    runner::{cryptdisks_start_args, cryptdisks_stop_args, mount_args, umount_args},
};

const PROC_MOUNTS: &str = "/proc/mounts";
const CRYPTTAB: &str = "/etc/crypttab";
const DEVICE_MAPPER: &str = "/dev/mapper";

// ─── Release guard ────────────────────────────────────────────────────────────

/// Something this run set up and has to tear down again.
pub struct Acquired<'a> {
    context: &'a dyn ExecutionContext,
    label: String,
    release: Vec<String>,
}

impl Drop for Acquired<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.context.run(&self.label, &self.release).into_result() {
            warn!("{e}");
        }
    }
}

// ─── Crypto devices ───────────────────────────────────────────────────────────

/// Unlock the crypttab target `name` unless it's already unlocked.
pub fn unlock_device<'a>(
    context: &'a dyn ExecutionContext,
    name: &str,
) -> Result<Option<Acquired<'a>>> {
    if context.exists(&Path::new(DEVICE_MAPPER).join(name)) {
        info!("Crypto device {name} is already unlocked.");
        return Ok(None);
    }

    let crypttab_error = |reason: String| BackupError::Crypttab {
        name: name.to_owned(),
        reason,
    };

    let crypttab = context
        .read_to_string(Path::new(CRYPTTAB))
        .map_err(|e| crypttab_error(format!("{e:#}")))?;
    let source = crypttab_source(&crypttab, name)
        .ok_or_else(|| crypttab_error(format!("no entry in {CRYPTTAB}")))?;

    let device = resolve_device(&source);
    if !context.exists(&device) {
        return Err(BackupError::MissingBackupDisk(format!(
            "Crypto device {name} isn't available ({} doesn't exist)!",
            device.display()
        ))
        .into());
    }

    let argv = context.command(cryptdisks_start_args(name), true);
    context.run(&format!("Unlock {name}"), &argv).into_result()?;

    Ok(Some(Acquired {
        context,
        label: format!("Lock {name}"),
        release: context.command(cryptdisks_stop_args(name), true),
    }))
}

/// Source device field of the crypttab entry for `name`.
pub fn crypttab_source(crypttab: &str, name: &str) -> Option<String> {
    crypttab
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(target), Some(source)) if target == name => Some(source.to_owned()),
                _ => None,
            }
        })
}

/// Device node for a crypttab source (`UUID=…`, `LABEL=…`, … or a path).
pub fn resolve_device(source: &str) -> PathBuf {
    const TAGS: [(&str, &str); 4] = [
        ("UUID=", "/dev/disk/by-uuid"),
        ("LABEL=", "/dev/disk/by-label"),
        ("PARTUUID=", "/dev/disk/by-partuuid"),
        ("PARTLABEL=", "/dev/disk/by-partlabel"),
    ];

    TAGS.iter()
        .find_map(|(tag, directory)| {
            source
                .strip_prefix(*tag)
                .map(|value| Path::new(directory).join(value))
        })
        .unwrap_or_else(|| PathBuf::from(source))
}

// ─── Mounting ─────────────────────────────────────────────────────────────────

/// Mount `mount_point` unless it's already mounted.
pub fn mount<'a>(
    context: &'a dyn ExecutionContext,
    mount_point: &str,
) -> Result<Option<Acquired<'a>>> {
    let mounts = context.read_to_string(Path::new(PROC_MOUNTS))?;
    if is_mount_point(&mounts, mount_point) {
        info!("{mount_point} is already mounted.");
        return Ok(None);
    }

    let argv = context.command(mount_args(mount_point), true);
    if let Err(e) = context.run(&format!("Mount {mount_point}"), &argv).into_result() {
        return Err(BackupError::MissingBackupDisk(format!(
            "Failed to mount backup disk at {mount_point}! ({e})"
        ))
        .into());
    }

    Ok(Some(Acquired {
        context,
        label: format!("Unmount {mount_point}"),
        release: context.command(umount_args(mount_point), true),
    }))
}

/// Whether `path` is listed as a mount point in `/proc/mounts` contents.
pub fn is_mount_point(mounts: &str, path: &str) -> bool {
    let path = normalize(path);
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| unescape(mount_point) == path)
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') { "/" } else { trimmed }
}

/// Undo the octal escapes (`\040` for a space, ...) used in `/proc/mounts`.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(idx) = rest.find('\\') {
        out.push_str(&rest[..idx]);
        let code = rest
            .get(idx + 1..idx + 4)
            .filter(|digits| digits.bytes().all(|b| (b'0'..=b'7').contains(&b)))
            .and_then(|digits| u8::from_str_radix(digits, 8).ok());
        match code {
            Some(byte) => {
                out.push(char::from(byte));
                rest = &rest[idx + 4..];
            },
            None => {
                out.push('\\');
                rest = &rest[idx + 1..];
            },
        }
    }
    out.push_str(rest);
    out
}
