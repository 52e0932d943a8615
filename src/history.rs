//! Classified view of the record file's commit history
//!
//! The history is the undo/redo stack. Every commit subject falls into one
//! of four kinds, matched by case-sensitive prefix:
//!
//! | subject                     | kind                    |
//! |-----------------------------|-------------------------|
//! | `Auto-commit: <Command>`    | [`CommitKind::AutoCommit`] |
//! | `Undo <sha>`                | [`CommitKind::Undo`]    |
//! | `Redo <sha>`                | [`CommitKind::Redo`]    |
//! | anything else               | [`CommitKind::Other`]   |
//!
//! [`plan_undo`] and [`plan_redo`] pick the commit an undo or redo acts on.
//! They are pure functions of the walked history; the skip-set they build
//! lives only for the duration of one call.

use crate::error::Result;
use crate::git::{Git, LogLine};
use chrono::{DateTime, FixedOffset};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// Subject prefix of commits recorded after a mutating command
pub const AUTO_COMMIT_PREFIX: &str = "Auto-commit: ";
/// Subject prefix of undo commits
pub const UNDO_PREFIX: &str = "Undo ";
/// Subject prefix of redo commits
pub const REDO_PREFIX: &str = "Redo ";
/// Command name of the database initialization commit
pub const INIT_COMMAND: &str = "InitCommand";

/// Classification of a commit subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitKind {
    /// Recorded after a mutating command
    AutoCommit {
        /// Command name, e.g. `AddCommand`
        command: String,
    },
    /// Reverted the commit `target`
    Undo {
        /// Sha of the undone commit
        target: String,
    },
    /// Reverted the undo commit `target`
    Redo {
        /// Sha of the undo commit that was reverted
        target: String,
    },
    /// Not authored by reftrail
    Other,
}

impl CommitKind {
    /// Classify a subject line
    pub fn classify(subject: &str) -> Self {
        if let Some(command) = subject.strip_prefix(AUTO_COMMIT_PREFIX) {
            return CommitKind::AutoCommit {
                command: command.trim().to_string(),
            };
        }
        if let Some(target) = subject.strip_prefix(UNDO_PREFIX).and_then(last_word) {
            return CommitKind::Undo { target };
        }
        if let Some(target) = subject.strip_prefix(REDO_PREFIX).and_then(last_word) {
            return CommitKind::Redo { target };
        }
        CommitKind::Other
    }

    /// Whether this is the database initialization commit
    pub fn is_init(&self) -> bool {
        matches!(self, CommitKind::AutoCommit { command } if command == INIT_COMMAND)
    }
}

fn last_word(rest: &str) -> Option<String> {
    rest.split_whitespace().last().map(str::to_string)
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitKind::AutoCommit { command } => write!(f, "{}", command),
            CommitKind::Undo { target } => write!(f, "undo {}", short_sha(target)),
            CommitKind::Redo { target } => write!(f, "redo {}", short_sha(target)),
            CommitKind::Other => write!(f, "other"),
        }
    }
}

/// Abbreviate a sha for display
pub fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// A classified commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Full commit sha
    pub sha: String,
    /// Subject line as recorded
    pub subject: String,
    /// Subject classification
    pub kind: CommitKind,
    /// Author date, if it was requested from git
    pub date: Option<DateTime<FixedOffset>>,
}

impl HistoryEntry {
    /// Classify a log line
    pub fn new(sha: impl Into<String>, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        Self {
            sha: sha.into(),
            kind: CommitKind::classify(&subject),
            subject,
            date: None,
        }
    }
}

impl From<LogLine> for HistoryEntry {
    fn from(line: LogLine) -> Self {
        let mut entry = HistoryEntry::new(line.sha, line.subject);
        entry.date = line.date;
        entry
    }
}

/// Reads and classifies the log of a repository
#[derive(Debug, Clone)]
pub struct HistoryWalker<'g> {
    git: &'g Git,
}

impl<'g> HistoryWalker<'g> {
    /// Walk the history of `git`
    pub fn new(git: &'g Git) -> Self {
        Self { git }
    }

    /// All commits, newest first
    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let entries: Vec<HistoryEntry> = self
            .git
            .log_oneline()?
            .into_iter()
            .map(HistoryEntry::from)
            .collect();
        debug!("Walked {} commits", entries.len());
        Ok(entries)
    }

    /// The newest `limit` commits with author dates
    pub fn recent(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .git
            .log_detailed(limit)?
            .into_iter()
            .map(HistoryEntry::from)
            .collect())
    }
}

/// Pick the commit an undo acts on
///
/// Walks `history` newest first. Undo commits add their target to a
/// skip-set and are never undone themselves. The first commit not in the
/// skip-set that is either any commit (with `force`) or a non-init
/// auto-commit is returned.
pub fn plan_undo(history: &[HistoryEntry], force: bool) -> Option<&HistoryEntry> {
    let mut undone: HashSet<&str> = HashSet::new();
    for entry in history {
        debug!("Processing commit {} {}", short_sha(&entry.sha), entry.subject);
        if let CommitKind::Undo { target } = &entry.kind {
            debug!("Storing undone commit sha: {}", target);
            undone.insert(target.as_str());
            continue;
        }
        if undone.contains(entry.sha.as_str()) {
            info!("Skipping {} as it was already undone", short_sha(&entry.sha));
            continue;
        }
        let eligible = force || (matches!(entry.kind, CommitKind::AutoCommit { .. }) && !entry.kind.is_init());
        if eligible {
            return Some(entry);
        }
    }
    None
}

/// Pick the undo commit a redo reverts
///
/// The mirror of [`plan_undo`]: redo commits fill the skip-set and the
/// first undo commit not in it is returned.
pub fn plan_redo(history: &[HistoryEntry]) -> Option<&HistoryEntry> {
    let mut redone: HashSet<&str> = HashSet::new();
    for entry in history {
        debug!("Processing commit {} {}", short_sha(&entry.sha), entry.subject);
        if let CommitKind::Redo { target } = &entry.kind {
            debug!("Storing redone commit sha: {}", target);
            redone.insert(target.as_str());
            continue;
        }
        if redone.contains(entry.sha.as_str()) {
            info!("Skipping {} as it was already redone", short_sha(&entry.sha));
            continue;
        }
        if matches!(entry.kind, CommitKind::Undo { .. }) {
            return Some(entry);
        }
    }
    None
}
