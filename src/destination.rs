//! Destination expressions and SSH tunnels.
//!
//! The command line carries the destination as one opaque expression, stored
//! verbatim in a [`DestinationDescriptor`].  Only the engine looks inside it,
//! through [`Location::parse`]:
//!
//! | Expression                                  | Location |
//! |---------------------------------------------|----------|
//! | `/mnt/backups/laptop`                       | Local    |
//! | `[user@]host:/srv/backups`                  | Shell    |
//! | `[user@]host::module[/path]`                | Daemon   |
//! | `rsync://[user@]host[:port]/module[/path]`  | Daemon   |
//!
//! A rsync daemon can also be reached through an SSH tunnel (`--tunnel`), in
//! which case rsync talks to a forwarded loopback port instead of the host.

use std::str::FromStr;

use crate::errors::{BackupError, ParseError};

/// Well-known port of the rsync daemon.
pub const RSYNCD_PORT: u16 = 873;

// ─── Tunnel ───────────────────────────────────────────────────────────────────

/// Parameters of an SSH tunnel to a remote rsync daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Host alias understood by `ssh` (may be a `~/.ssh/config` entry).
    pub ssh_alias: String,
    /// Remote login name; empty means "whatever ssh picks".
    pub ssh_user: String,
    /// Port of the rsync daemon on the remote side.
    pub remote_port: u16,
    /// Port of the SSH server.
    pub port: Option<u16>,
    /// Loopback port to forward.  Allocated when the tunnel is opened unless
    /// set here.
    pub local_port: Option<u16>,
}

impl FromStr for TunnelSpec {
    type Err = ParseError;

    /// Parses `[ssh_user@]ssh_alias[:port]`.
    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let (ssh_user, rest) = expression.rsplit_once('@').unwrap_or(("", expression));
        let (ssh_alias, port) = rest.split_once(':').unwrap_or((rest, ""));

        if ssh_alias.is_empty() {
            return Err(ParseError::TunnelAlias(expression.to_owned()));
        }

        let port = if port.is_empty() {
            None
        } else {
            Some(port.parse::<u16>().map_err(|_| ParseError::TunnelPort {
                expression: expression.to_owned(),
                port: port.to_owned(),
            })?)
        };

        Ok(Self {
            ssh_alias: ssh_alias.to_owned(),
            ssh_user: ssh_user.to_owned(),
            remote_port: RSYNCD_PORT,
            port,
            local_port: None,
        })
    }
}

/// `value_parser` for `--tunnel`.
pub fn parse_tunnel(value: &str) -> Result<TunnelSpec, ParseError> {
    value.parse()
}

// ─── Descriptor ───────────────────────────────────────────────────────────────

/// Where the backup goes, as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationDescriptor {
    /// Verbatim destination argument.  `None` when the destination comes from
    /// `$RSYNC_MODULE_PATH`.
    pub expression: Option<String>,
    pub tunnel: Option<TunnelSpec>,
}

// ─── Location ─────────────────────────────────────────────────────────────────

/// Engine-side interpretation of a destination expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local {
        path: String,
    },
    Shell {
        user: Option<String>,
        host: String,
        path: String,
    },
    Daemon {
        user: Option<String>,
        host: String,
        port: Option<u16>,
        module: String,
        path: String,
    },
}

impl Location {
    pub fn parse(expression: &str) -> Result<Self, BackupError> {
        let invalid = |reason: &str| BackupError::InvalidDestination {
            expression: expression.to_owned(),
            reason: reason.to_owned(),
        };

        if expression.is_empty() {
            return Err(invalid("empty expression"));
        }

        if let Some(rest) = expression.strip_prefix("rsync://") {
            let (authority, module_path) = rest.split_once('/').unwrap_or((rest, ""));
            let (user, host_port) = split_user(authority);
            let (host, port) = match host_port.split_once(':') {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|_| invalid("bad port number"))?;
                    (host, Some(port))
                },
                None => (host_port, None),
            };
            let (module, path) = split_module(module_path);
            if host.is_empty() {
                return Err(invalid("missing host name"));
            }
            if module.is_empty() {
                return Err(invalid("missing rsync module name"));
            }
            return Ok(Self::Daemon {
                user,
                host: host.to_owned(),
                port,
                module: module.to_owned(),
                path: path.to_owned(),
            });
        }

        let first_slash = expression.find('/').unwrap_or(expression.len());

        if let Some(idx) = expression.find("::").filter(|&idx| idx < first_slash) {
            let (user, host) = split_user(&expression[..idx]);
            let (module, path) = split_module(&expression[idx + 2..]);
            if host.is_empty() {
                return Err(invalid("missing host name"));
            }
            if module.is_empty() {
                return Err(invalid("missing rsync module name"));
            }
            return Ok(Self::Daemon {
                user,
                host: host.to_owned(),
                port: None,
                module: module.to_owned(),
                path: path.to_owned(),
            });
        }

        if let Some(idx) = expression.find(':').filter(|&idx| idx > 0 && idx < first_slash) {
            let (user, host) = split_user(&expression[..idx]);
            return Ok(Self::Shell {
                user,
                host: host.to_owned(),
                path: expression[idx + 1..].to_owned(),
            });
        }

        Ok(Self::Local {
            path: expression.to_owned(),
        })
    }

    pub const fn is_daemon(&self) -> bool {
        matches!(self, Self::Daemon { .. })
    }

    /// rsync target for the `latest` tree.  `tunnel_port` redirects a daemon
    /// location to a forwarded loopback port.
    pub fn rsync_target(&self, tunnel_port: Option<u16>) -> String {
        match self {
            Self::Local { path } => format!("{}/", join(path, "latest")),
            Self::Shell { user, host, path } => {
                format!("{}{host}:{}/", user_prefix(user), join(path, "latest"))
            },
            Self::Daemon {
                user,
                host,
                port,
                module,
                path,
            } => {
                let (host, port) = match tunnel_port {
                    Some(local) => ("localhost", Some(local)),
                    None => (host.as_str(), *port),
                };
                let port = port.map(|p| format!(":{p}")).unwrap_or_default();
                let directory = join(&format!("{module}/{path}"), "latest");
                format!("rsync://{}{host}{port}/{directory}/", user_prefix(user))
            },
        }
    }
}

fn split_user(authority: &str) -> (Option<String>, &str) {
    match authority.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user.to_owned()), host),
        Some((_, host)) => (None, host),
        None => (None, authority),
    }
}

fn split_module(module_path: &str) -> (&str, &str) {
    module_path.split_once('/').unwrap_or((module_path, ""))
}

fn user_prefix(user: &Option<String>) -> String {
    user.as_ref().map(|u| format!("{u}@")).unwrap_or_default()
}

/// Joins a directory and a leaf name, tolerating trailing slashes and an
/// empty (relative to login directory) directory.
pub fn join(directory: &str, leaf: &str) -> String {
    let trimmed = directory.trim_end_matches('/');
    if trimmed.is_empty() {
        if directory.starts_with('/') {
            format!("/{leaf}")
        } else {
            leaf.to_owned()
        }
    } else {
        format!("{trimmed}/{leaf}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TunnelSpec ────────────────────────────────────────────────────────────

    #[test]
    fn tunnel_with_user_and_port() {
        let spec: TunnelSpec = "alice@backup-host:2222".parse().unwrap();
        assert_eq!(spec.ssh_user, "alice");
        assert_eq!(spec.ssh_alias, "backup-host");
        assert_eq!(spec.port, Some(2222));
        assert_eq!(spec.remote_port, RSYNCD_PORT);
        assert_eq!(spec.local_port, None);
    }

    #[test]
    fn tunnel_alias_only() {
        let spec: TunnelSpec = "backup-host".parse().unwrap();
        assert_eq!(spec.ssh_user, "");
        assert_eq!(spec.ssh_alias, "backup-host");
        assert_eq!(spec.port, None);
    }

    #[test]
    fn tunnel_user_splits_on_last_at() {
        let spec: TunnelSpec = "bob@corp@gateway".parse().unwrap();
        assert_eq!(spec.ssh_user, "bob@corp");
        assert_eq!(spec.ssh_alias, "gateway");
    }

    #[test]
    fn tunnel_empty_port_segment_means_no_port() {
        let spec: TunnelSpec = "gateway:".parse().unwrap();
        assert_eq!(spec.port, None);
    }

    #[test]
    fn tunnel_rejects_non_numeric_port() {
        let err = "alice@host:ssh".parse::<TunnelSpec>().unwrap_err();
        assert!(matches!(err, ParseError::TunnelPort { ref port, .. } if port == "ssh"));
    }

    #[test]
    fn tunnel_rejects_out_of_range_port() {
        assert!("host:70000".parse::<TunnelSpec>().is_err());
    }

    #[test]
    fn tunnel_rejects_missing_alias() {
        assert!(matches!(
            "alice@".parse::<TunnelSpec>(),
            Err(ParseError::TunnelAlias(_))
        ));
    }

    // ── Location::parse ───────────────────────────────────────────────────────

    #[test]
    fn absolute_path_is_local() {
        assert_eq!(Location::parse("/mnt/backups/laptop").unwrap(), Location::Local {
            path: "/mnt/backups/laptop".into(),
        });
    }

    #[test]
    fn relative_path_with_colon_after_slash_is_local() {
        assert_eq!(Location::parse("backups/a:b").unwrap(), Location::Local {
            path: "backups/a:b".into(),
        });
    }

    #[test]
    fn host_colon_path_is_shell() {
        assert_eq!(
            Location::parse("root@server:/srv/backups").unwrap(),
            Location::Shell {
                user: Some("root".into()),
                host: "server".into(),
                path: "/srv/backups".into(),
            }
        );
    }

    #[test]
    fn double_colon_is_daemon() {
        assert_eq!(
            Location::parse("server::backups/laptop").unwrap(),
            Location::Daemon {
                user: None,
                host: "server".into(),
                port: None,
                module: "backups".into(),
                path: "laptop".into(),
            }
        );
    }

    #[test]
    fn rsync_url_is_daemon_with_port() {
        assert_eq!(
            Location::parse("rsync://alice@server:8873/backups").unwrap(),
            Location::Daemon {
                user: Some("alice".into()),
                host: "server".into(),
                port: Some(8873),
                module: "backups".into(),
                path: String::new(),
            }
        );
    }

    #[test]
    fn rsync_url_without_module_is_invalid() {
        let err = Location::parse("rsync://server/").unwrap_err();
        assert!(matches!(err, BackupError::InvalidDestination { .. }));
    }

    #[test]
    fn rsync_url_with_bad_port_is_invalid() {
        assert!(Location::parse("rsync://server:http/backups").is_err());
    }

    // ── rsync_target ──────────────────────────────────────────────────────────

    #[test]
    fn local_target_points_at_latest() {
        let loc = Location::parse("/mnt/backups/").unwrap();
        assert_eq!(loc.rsync_target(None), "/mnt/backups/latest/");
    }

    #[test]
    fn shell_target_keeps_user_and_host() {
        let loc = Location::parse("root@server:/srv").unwrap();
        assert_eq!(loc.rsync_target(None), "root@server:/srv/latest/");
    }

    #[test]
    fn daemon_target_through_tunnel_uses_loopback() {
        let loc = Location::parse("rsync://alice@server/backups/laptop").unwrap();
        assert_eq!(
            loc.rsync_target(Some(40_000)),
            "rsync://alice@localhost:40000/backups/laptop/latest/"
        );
        assert_eq!(
            loc.rsync_target(None),
            "rsync://alice@server/backups/laptop/latest/"
        );
    }

    #[test]
    fn join_handles_root_and_empty() {
        assert_eq!(join("/", "latest"), "/latest");
        assert_eq!(join("", "latest"), "latest");
        assert_eq!(join("dir//", "latest"), "dir/latest");
    }
}
