//! Execution contexts: where commands run.
//!
//! The engine never spawns processes directly.  It asks an
//! [`ExecutionContext`] to build and run argument vectors, which keeps the
//! source side (always the local machine today) swappable, lets the
//! destination side run snapshot and rotation commands over ssh, and lets
//! tests substitute a recording fake.

use std::path::Path;

use anyhow::{Context, Result};
use nix::unistd::geteuid;

use crate::{
    runner::{prefix, remote_command},
    ui::{StageOutcome, run_stage},
};

/// Options for building the source context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub sudo_enabled: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self { sudo_enabled: true }
    }
}

pub trait ExecutionContext {
    /// Complete argument vector for `argv`.  `privileged` commands are
    /// escalated when the context is configured to do so.
    fn command(&self, argv: Vec<String>, privileged: bool) -> Vec<String>;

    /// Run an argument vector produced by [`ExecutionContext::command`].
    fn run(&self, label: &str, argv: &[String]) -> StageOutcome {
        run_stage(label, argv)
    }

    fn exists(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Short description for log messages.
    fn describe(&self) -> String;
}

/// Builds the source context.
pub fn create_context(options: &ContextOptions) -> Box<dyn ExecutionContext> {
    Box::new(LocalContext::new(options))
}

// ─── Local ────────────────────────────────────────────────────────────────────

/// Commands run on this machine, optionally through `sudo`.
#[derive(Debug)]
pub struct LocalContext {
    sudo: bool,
}

impl LocalContext {
    /// `sudo` is only used when enabled and we're not already root.
    pub fn new(options: &ContextOptions) -> Self {
        Self {
            sudo: options.sudo_enabled && !geteuid().is_root(),
        }
    }
}

impl ExecutionContext for LocalContext {
    fn command(&self, argv: Vec<String>, privileged: bool) -> Vec<String> {
        let mut cmd = prefix(self.sudo && privileged);
        cmd.extend(argv);
        cmd
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }

    fn describe(&self) -> String {
        if self.sudo {
            "local system (using sudo)".to_owned()
        } else {
            "local system".to_owned()
        }
    }
}

// ─── Remote ───────────────────────────────────────────────────────────────────

/// Commands run on another host through `ssh`.
#[derive(Debug)]
pub struct RemoteContext {
    /// `[user@]host` as passed to ssh.
    target: String,
}

impl RemoteContext {
    pub fn new(user: Option<&str>, host: &str) -> Self {
        let target = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_owned(),
        };
        Self { target }
    }
}

impl ExecutionContext for RemoteContext {
    fn command(&self, argv: Vec<String>, _privileged: bool) -> Vec<String> {
        remote_command(&self.target, &argv)
    }

    fn exists(&self, path: &Path) -> bool {
        let argv = remote_command(&self.target, &[
            "test".to_owned(),
            "-e".to_owned(),
            path.display().to_string(),
        ]);
        self.run("Check remote path", &argv).is_success()
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let argv = remote_command(&self.target, &["cat".to_owned(), path.display().to_string()]);
        let outcome = self.run("Read remote file", &argv).into_result()?;
        Ok(outcome.stdout)
    }

    fn describe(&self) -> String {
        format!("remote system {}", self.target)
    }
}


/// Recording stand-in for tests: commands "succeed" unless their program is
/// listed in `failing`, files come from `files`.
#[cfg(test)]
pub mod fake {
    use std::{
        cell::RefCell,
        collections::{HashMap, HashSet},
        path::{Path, PathBuf},
        rc::Rc,
    };

    use anyhow::{Result, anyhow};

    use super::ExecutionContext;
    use crate::ui::{Captured, StageOutcome};

    pub type CommandLog = Rc<RefCell<Vec<Vec<String>>>>;

    #[derive(Debug, Default)]
    pub struct FakeContext {
        pub files: HashMap<PathBuf, String>,
        pub existing: HashSet<PathBuf>,
        pub failing: HashSet<String>,
        pub log: CommandLog,
    }

    impl FakeContext {
        pub fn with_file(mut self, path: &str, contents: &str) -> Self {
            self.files.insert(PathBuf::from(path), contents.to_owned());
            self
        }

        pub fn with_existing(mut self, path: &str) -> Self {
            self.existing.insert(PathBuf::from(path));
            self
        }

        pub fn failing(mut self, program: &str) -> Self {
            self.failing.insert(program.to_owned());
            self
        }

        /// Programs run so far, in order.
        pub fn programs(log: &CommandLog) -> Vec<String> {
            log.borrow().iter().map(|argv| argv[0].clone()).collect()
        }
    }

    impl ExecutionContext for FakeContext {
        fn command(&self, argv: Vec<String>, _privileged: bool) -> Vec<String> {
            argv
        }

        fn run(&self, label: &str, argv: &[String]) -> StageOutcome {
            self.log.borrow_mut().push(argv.to_vec());
            if !self.failing.contains(&argv[0]) {
                return StageOutcome::succeeded(label, Captured::default());
            }
            let output = Captured {
                stdout: String::new(),
                stderr: format!("{}: simulated failure", argv[0]),
            };
            StageOutcome::failed(label, output, format!("{} returned exit status: 1", argv[0]))
        }

        fn exists(&self, path: &Path) -> bool {
            self.existing.contains(path) || self.files.contains_key(path)
        }

        fn read_to_string(&self, path: &Path) -> Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow!("reading {}: no such file", path.display()))
        }

        fn describe(&self) -> String {
            "fake system".to_owned()
        }
    }
}
