//! Stage execution behind a spinner.
//!
//! A stage is one external command with a short label.  While it runs the
//! terminal shows a spinner next to the label (indicatif hides it when stderr
//! isn't a terminal, as under cron).  Output is captured: after a successful
//! stage stdout goes to the debug log, after a failed one the last lines of it
//! end up in [`BackupError::StageFailed`].

use std::{
    process::{Command, ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::errors::BackupError;

const TICKS: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

/// Output lines kept when a stage fails.
const TAIL_LINES: usize = 10;

// ─── Outcome ──────────────────────────────────────────────────────────────────

/// What a command wrote.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Last non-blank lines of stderr, or of stdout when stderr is blank.
    fn tail(&self) -> Vec<&str> {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        lines[lines.len().saturating_sub(TAIL_LINES)..].to_vec()
    }
}

#[derive(Debug)]
pub struct StageOutcome {
    pub label: String,
    pub output: Captured,
    /// Why the stage failed; `None` on success.
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn succeeded(label: &str, output: Captured) -> Self {
        Self {
            label: label.to_owned(),
            output,
            error: None,
        }
    }

    pub fn failed(label: &str, output: Captured, error: String) -> Self {
        Self {
            label: label.to_owned(),
            output,
            error: Some(error),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The captured output of a successful stage, or the stage error.
    pub fn into_result(self) -> Result<Captured, BackupError> {
        let Some(error) = self.error else {
            info!("{} {}", style("✓").for_stderr().green(), self.label);
            for line in self.output.stdout.lines() {
                debug!("  {line}");
            }
            return Ok(self.output);
        };

        let mut detail = error;
        for line in self.output.tail() {
            detail.push_str("\n  ");
            detail.push_str(line);
        }
        Err(BackupError::StageFailed {
            stage: self.label,
            detail,
        })
    }
}

// ─── Running ──────────────────────────────────────────────────────────────────

fn spinner(label: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg} {elapsed:.dim}") {
        bar.set_style(template.tick_chars(TICKS));
    }
    bar.set_message(label.to_owned());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Runs `argv` to completion with stdin closed and both output streams
/// captured.
pub fn capture(argv: &[String]) -> Result<(ExitStatus, Captured)> {
    let (program, args) = argv.split_first().context("empty command line")?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("unable to run {program}"))?;

    Ok((output.status, Captured {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }))
}

/// Runs one stage behind a spinner.
pub fn run_stage(label: &str, argv: &[String]) -> StageOutcome {
    debug!("{label}: {}", argv.join(" "));
    let bar = spinner(label);

    let outcome = match capture(argv) {
        Ok((status, output)) if status.success() => StageOutcome::succeeded(label, output),
        Ok((status, output)) => {
            StageOutcome::failed(label, output, format!("{} returned {status}", argv[0]))
        },
        Err(e) => StageOutcome::failed(label, Captured::default(), format!("{e:#}")),
    };

    bar.finish_and_clear();
    outcome
}
