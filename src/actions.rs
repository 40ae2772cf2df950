//! Explicit action selection.
//!
//! Without any of `--backup`, `--snapshot` or `--rotate` every action runs.
//! The first explicit flag switches to "only what was asked for": the named
//! action is enabled and every action not yet mentioned is disabled.  A later
//! explicit flag can still enable its own action, but an action that is
//! already defined is never overwritten by the implicit fallback.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Backup,
    Snapshot,
    Rotate,
}

impl Action {
    pub const ALL: [Self; 3] = [Self::Backup, Self::Snapshot, Self::Rotate];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backup => "backup",
            Self::Snapshot => "snapshot",
            Self::Rotate => "rotate",
        })
    }
}

/// Three-way action selection.  `None` means "not decided on the command
/// line", which the engine reads as enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet {
    pub backup: Option<bool>,
    pub snapshot: Option<bool>,
    pub rotate: Option<bool>,
}

impl ActionSet {
    /// Returns a new set with `action` explicitly enabled and every still
    /// undefined action disabled.
    #[must_use]
    pub fn enable(mut self, action: Action) -> Self {
        *self.slot(action) = Some(true);
        for other in Action::ALL {
            if other != action {
                self.slot(other).get_or_insert(false);
            }
        }
        self
    }

    /// Folds a sequence of explicit selections, in command-line order.
    pub fn from_explicit<I>(actions: I) -> Self
    where
        I: IntoIterator<Item = Action>,
    {
        actions.into_iter().fold(Self::default(), Self::enable)
    }

    /// `true` until the first explicit selection.
    pub const fn is_undefined(&self) -> bool {
        self.backup.is_none() && self.snapshot.is_none() && self.rotate.is_none()
    }

    /// Whether the engine should run `action`.
    pub fn enabled(&self, action: Action) -> bool {
        self.get(action).unwrap_or(true)
    }

    /// Whether `action` was asked for on the command line.
    pub fn is_explicit(&self, action: Action) -> bool {
        self.get(action) == Some(true)
    }

    const fn get(&self, action: Action) -> Option<bool> {
        match action {
            Action::Backup => self.backup,
            Action::Snapshot => self.snapshot,
            Action::Rotate => self.rotate,
        }
    }

    fn slot(&mut self, action: Action) -> &mut Option<bool> {
        match action {
            Action::Backup => &mut self.backup,
            Action::Snapshot => &mut self.snapshot,
            Action::Rotate => &mut self.rotate,
        }
    }
}
