//! Auto-commits wrapping store mutations
//!
//! A mutating command runs inside [`CommitRecorder::record`]: the mutation is
//! applied to the store, the store is saved, and the record file is committed
//! with the message
//!
//! ```text
//! Auto-commit: <Name>Command
//!
//! { ...the command's arguments as pretty JSON... }
//! ```
//!
//! The JSON body is what [`crate::resume::ResumeDecoder`] reads back later.
//! Arguments that must not end up in the history are excluded with
//! `#[serde(skip)]` on the invocation type.
//!
//! When tracking is disabled the recorder does nothing beyond the save; when
//! it is enabled but not initialized it warns and does nothing.

use crate::error::Result;
use crate::git::Git;
use crate::history::AUTO_COMMIT_PREFIX;
use crate::store::RecordStore;
use crate::types::StoreConfig;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// A command invocation whose arguments are recorded in its commit
pub trait CommandInvocation: Serialize {
    /// Lower-case command name, e.g. `add`
    fn name(&self) -> &str;

    /// Whether a commit is created even if the record file did not change
    fn allow_empty(&self) -> bool {
        false
    }
}

/// Observer of auto-commits
///
/// Hooks run around commit creation only. The file mutation has already
/// happened by then and cannot be undone from a hook.
///
/// # Examples
///
/// ```rust
/// use reftrail::commit::CommitHook;
/// use serde_json::Value;
/// use std::path::Path;
///
/// struct SignOff;
///
/// impl CommitHook for SignOff {
///     fn pre_commit(&self, message: &str, _args: &Value) -> Option<String> {
///         Some(format!("{}\n\nSigned-off-by: Reftrail <reftrail@localhost>", message))
///     }
///
///     fn post_commit(&self, root: &Path, file: &Path) {
///         println!("committed {:?} in {:?}", file, root);
///     }
/// }
/// ```
pub trait CommitHook: Send + Sync {
    /// Called before the commit; returning a message replaces the default
    fn pre_commit(&self, _message: &str, _args: &Value) -> Option<String> {
        None
    }

    /// Called after the commit was created
    fn post_commit(&self, _root: &Path, _file: &Path) {}
}

/// Hook that does nothing
#[derive(Debug)]
pub struct NoOpHook;

impl CommitHook for NoOpHook {}

/// What the recorder did after a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    /// A commit was created
    Committed {
        /// Sha of the new commit
        sha: String,
    },
    /// Git tracking is disabled
    Disabled,
    /// Git tracking is enabled but not initialized
    NotInitialized,
    /// The record file did not change and empty commits were not allowed
    NoChanges,
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitStatus::Committed { sha } => write!(f, "committed {}", crate::history::short_sha(sha)),
            CommitStatus::Disabled => write!(f, "git tracking disabled"),
            CommitStatus::NotInitialized => write!(f, "git tracking not initialized"),
            CommitStatus::NoChanges => write!(f, "nothing to commit"),
        }
    }
}

/// Creates auto-commits after store mutations
#[derive(Default)]
pub struct CommitRecorder {
    hooks: Vec<Box<dyn CommitHook>>,
}

impl fmt::Debug for CommitRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitRecorder")
            .field("hooks", &format!("<{} hooks>", self.hooks.len()))
            .finish()
    }
}

impl CommitRecorder {
    /// Create a recorder without hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook
    pub fn add_hook(&mut self, hook: Box<dyn CommitHook>) {
        self.hooks.push(hook);
    }

    /// Apply `mutate` to the store, save and commit
    ///
    /// Errors from `mutate` or the save are returned before anything is
    /// committed; the store's ledger then still holds the pending edits.
    pub fn record<C, T, F>(&self, store: &mut RecordStore, invocation: &C, mutate: F) -> Result<(T, CommitStatus)>
    where
        C: CommandInvocation,
        F: FnOnce(&mut RecordStore) -> Result<T>,
    {
        let value = mutate(store)?;
        store.save()?;
        let status = self.commit(store.config(), invocation, false)?;
        Ok((value, status))
    }

    /// Commit the record file for `invocation`
    ///
    /// `force` commits even if tracking is disabled in `config`; it is used
    /// while initializing tracking.
    pub fn commit<C: CommandInvocation>(&self, config: &StoreConfig, invocation: &C, force: bool) -> Result<CommitStatus> {
        if !config.git && !force {
            return Ok(CommitStatus::Disabled);
        }

        let git = Git::new(config.root());
        if !git.is_inside_work_tree() {
            warn!(
                "You have configured reftrail to track your database with git. \
                 Please run `reftrail init --git` to initialize this tracking."
            );
            return Ok(CommitStatus::NotInitialized);
        }

        let args = serde_json::to_value(invocation)?;
        let mut message = commit_message(invocation.name(), &args)?;
        for hook in &self.hooks {
            if let Some(replacement) = hook.pre_commit(&message, &args) {
                message = replacement;
            }
        }

        git.add(&config.file)?;
        let allow_empty = invocation.allow_empty();
        if !allow_empty && !git.has_staged_changes()? {
            debug!("Nothing changed; skipping auto-commit for {}", invocation.name());
            return Ok(CommitStatus::NoChanges);
        }

        debug!("Auto-commit to git from {} command", invocation.name());
        git.commit(&message, allow_empty)?;
        let sha = git.rev_parse("HEAD")?;
        info!("Recorded {}", message.lines().next().unwrap_or_default());

        for hook in &self.hooks {
            hook.post_commit(git.root(), &config.file);
        }
        Ok(CommitStatus::Committed { sha })
    }
}

/// `add` → `AddCommand`
pub fn command_name(name: &str) -> String {
    let mut chars = name.chars();
    let mut out = String::with_capacity(name.len() + 7);
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.extend(chars.flat_map(char::to_lowercase));
    }
    out.push_str("Command");
    out
}

/// Build the auto-commit message for a command and its JSON arguments
///
/// The body is omitted when there are no arguments to record.
pub fn commit_message(name: &str, args: &Value) -> Result<String> {
    let mut message = format!("{}{}", AUTO_COMMIT_PREFIX, command_name(name));
    let empty = match args {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if !empty {
        message.push_str("\n\n");
        message.push_str(&serde_json::to_string_pretty(args)?);
    }
    Ok(message)
}
