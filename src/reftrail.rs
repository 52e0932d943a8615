//! The store handle tying configuration, records and history together
//!
//! A [`Reftrail`] is created once per process (or per test) and passed to
//! every command. It owns the [`RecordStore`] and the [`CommitRecorder`] and
//! opens git tracking on demand for undo, redo, resume and log.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use reftrail::{CommandInvocation, FieldValue, Record, ReftrailBuilder};
//! use serde::Serialize;
//! use std::collections::BTreeMap;
//!
//! #[derive(Serialize)]
//! struct AddArgs {
//!     label: String,
//! }
//!
//! impl CommandInvocation for AddArgs {
//!     fn name(&self) -> &str {
//!         "add"
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reftrail = ReftrailBuilder::new("literature.yaml").git(true).open()?;
//!
//! let args = AddArgs { label: "knuth1984".to_string() };
//! reftrail.record(&args, |store| {
//!     let mut fields = BTreeMap::new();
//!     fields.insert("title".to_string(), FieldValue::from("Literate Programming"));
//!     store.update([Record::new("knuth1984", fields)]);
//!     Ok(())
//! })?;
//!
//! reftrail.undo(false)?;
//! # Ok(())
//! # }
//! ```

use crate::commit::{CommandInvocation, CommitHook, CommitRecorder, CommitStatus};
use crate::error::Result;
use crate::git::Git;
use crate::history::{HistoryEntry, HistoryWalker};
use crate::resume::{MergePolicy, ResumeDecoder, ResumeOutcome};
use crate::revert::{RevertEngine, RevertOutcome};
use crate::store::RecordStore;
use crate::types::{Diagnostic, LabelSuffixConfig, ReadSource, StoreConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Arguments recorded by the database initialization commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitArgs {
    /// Whether git tracking was initialized
    pub git: bool,
}

impl CommandInvocation for InitArgs {
    fn name(&self) -> &str {
        "init"
    }
}

/// What `init` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// Whether the record file was created
    pub created: bool,
    /// Whether a git repository was created
    pub repository_created: bool,
    /// Result of the initialization commit, if one was attempted
    pub commit: Option<CommitStatus>,
}

/// Handle on one record store and its history
#[derive(Debug)]
pub struct Reftrail {
    store: RecordStore,
    recorder: CommitRecorder,
}

impl Reftrail {
    /// Open the store described by `config` and read it
    ///
    /// # Errors
    ///
    /// Fails with [`crate::ReftrailError::DatabaseMissing`] if the record
    /// file does not exist.
    pub fn open(config: StoreConfig) -> Result<Self> {
        ReftrailBuilder::from_config(config).open()
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        self.store.config()
    }

    /// The record store
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// The record store, mutably (changes are not committed)
    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    /// Register a commit hook
    pub fn add_hook(&mut self, hook: Box<dyn CommitHook>) {
        self.recorder.add_hook(hook);
    }

    /// Re-read the record file
    pub fn reload(&mut self, bypass_cache: bool) -> Result<ReadSource> {
        self.store.read(bypass_cache)
    }

    /// Run a mutating command: mutate, save and auto-commit
    pub fn record<C, T, F>(&mut self, invocation: &C, mutate: F) -> Result<(T, CommitStatus)>
    where
        C: CommandInvocation,
        F: FnOnce(&mut RecordStore) -> Result<T>,
    {
        self.recorder.record(&mut self.store, invocation, mutate)
    }

    /// Undo the newest eligible auto-commit
    #[instrument(skip(self))]
    pub fn undo(&mut self, force: bool) -> Result<RevertOutcome> {
        let git = Git::for_store(self.store.config())?;
        RevertEngine::new(&git).undo(&mut self.store, force)
    }

    /// Redo the newest undo
    #[instrument(skip(self))]
    pub fn redo(&mut self) -> Result<RevertOutcome> {
        let git = Git::for_store(self.store.config())?;
        RevertEngine::new(&git).redo(&mut self.store)
    }

    /// Merge the arguments recorded in `reference` into `args`
    pub fn resume_into<T>(&self, reference: &str, args: &mut T, policy: &MergePolicy) -> ResumeOutcome
    where
        T: Serialize + DeserializeOwned,
    {
        ResumeDecoder::new(self.store.config()).resume_into(reference, args, policy)
    }

    /// The newest `limit` commits, classified
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let git = Git::for_store(self.store.config())?;
        HistoryWalker::new(&git).recent(limit)
    }

    /// Force a full parse and return its diagnostics
    pub fn lint(&mut self) -> Result<Vec<Diagnostic>> {
        self.store.read(true)?;
        Ok(self.store.diagnostics().to_vec())
    }
}

/// Builder for [`Reftrail`]
///
/// Starts from [`StoreConfig::for_file`] (no cache, no git) unless a full
/// configuration is supplied.
pub struct ReftrailBuilder {
    config: StoreConfig,
    hooks: Vec<Box<dyn CommitHook>>,
}

impl std::fmt::Debug for ReftrailBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReftrailBuilder")
            .field("config", &self.config)
            .field("hooks", &format!("<{} hooks>", self.hooks.len()))
            .finish()
    }
}

impl ReftrailBuilder {
    /// Start building for the record file at `file`
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self::from_config(StoreConfig::for_file(file))
    }

    /// Start from an existing configuration
    pub fn from_config(config: StoreConfig) -> Self {
        Self {
            config,
            hooks: Vec::new(),
        }
    }

    /// Set the record file
    pub fn file(mut self, file: impl Into<PathBuf>) -> Self {
        self.config.file = file.into();
        self
    }

    /// Set the cache directory (`None` disables caching)
    pub fn cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.cache_dir = dir;
        self
    }

    /// Enable or disable git tracking
    pub fn git(mut self, enabled: bool) -> Self {
        self.config.git = enabled;
        self
    }

    /// Set the label disambiguation format
    pub fn label_suffix(mut self, suffix: LabelSuffixConfig) -> Self {
        self.config.label_suffix = suffix;
        self
    }

    /// Add a commit hook
    pub fn hook(mut self, hook: Box<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn assemble(self) -> Result<Reftrail> {
        self.config.validate()?;
        let mut recorder = CommitRecorder::new();
        for hook in self.hooks {
            recorder.add_hook(hook);
        }
        Ok(Reftrail {
            store: RecordStore::new(self.config),
            recorder,
        })
    }

    /// Build and read the existing record file
    pub fn open(self) -> Result<Reftrail> {
        let mut reftrail = self.assemble()?;
        reftrail.store.read(false)?;
        Ok(reftrail)
    }

    /// Create the record file (and optionally its repository), then open it
    ///
    /// An existing file is never overwritten. With `with_git` the directory
    /// is initialized as a repository if it is not one yet and the
    /// initialization commit is recorded, even if tracking is disabled in
    /// the configuration.
    #[instrument(skip(self), fields(file = ?self.config.file))]
    pub fn init(self, with_git: bool) -> Result<(Reftrail, InitReport)> {
        let mut reftrail = self.assemble()?;
        let config = reftrail.store.config().clone();
        let root = config.root();
        let git = Git::new(&root);
        let tracked = git.is_inside_work_tree();

        let mut report = InitReport {
            created: false,
            repository_created: false,
            commit: None,
        };

        if config.file.exists() {
            if tracked {
                info!("Database file already exists and is being tracked by git. There is nothing else to do.");
                reftrail.store.read(false)?;
                return Ok((reftrail, report));
            }
            if !with_git {
                warn!("Database file already exists! Use --git to start tracking it with git.");
                reftrail.store.read(false)?;
                return Ok((reftrail, report));
            }
        } else {
            debug!("Creating empty database file: {:?}", config.file);
            fs::create_dir_all(&root)?;
            fs::write(&config.file, "")?;
            report.created = true;
        }

        if with_git {
            if !config.git {
                warn!(
                    "Initializing git tracking of the database; it only takes effect once \
                     git tracking is also enabled in the configuration."
                );
            }
            if !tracked {
                git.init()?;
                report.repository_created = true;
            }
            let status = reftrail.recorder.commit(&config, &InitArgs { git: true }, true)?;
            report.commit = Some(status);
        }

        reftrail.store.read(false)?;
        Ok((reftrail, report))
    }
}
