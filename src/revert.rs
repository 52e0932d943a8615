//! Undo and redo on top of the commit history
//!
//! Each undo or redo is an ordinary `git revert --no-commit` followed by a
//! commit whose subject names the reverted sha. The history itself is the
//! stack; [`crate::history::plan_undo`] and [`crate::history::plan_redo`]
//! decide which commit to act on. Exactly one commit is reverted per call
//! and the store is reloaded from the record file afterwards.

use crate::error::{ReftrailError, Result};
use crate::git::Git;
use crate::history::{plan_redo, plan_undo, short_sha, HistoryWalker, REDO_PREFIX, UNDO_PREFIX};
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

/// Which direction a revert went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertKind {
    /// An auto-commit (or, forced, any commit) was reverted
    Undo,
    /// An undo commit was reverted
    Redo,
}

/// Result of a successful undo or redo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertOutcome {
    /// Direction of the revert
    pub kind: RevertKind,
    /// Sha of the commit that was reverted
    pub reverted: String,
    /// Subject of the commit that was reverted
    pub reverted_subject: String,
    /// Sha of the newly created undo/redo commit
    pub commit: String,
}

/// Performs undo and redo against one repository
#[derive(Debug, Clone)]
pub struct RevertEngine<'g> {
    git: &'g Git,
}

impl<'g> RevertEngine<'g> {
    /// Create an engine for `git`
    pub fn new(git: &'g Git) -> Self {
        Self { git }
    }

    /// Undo the newest eligible commit and reload `store`
    ///
    /// Without `force` only auto-commits other than the database
    /// initialization are eligible.
    ///
    /// # Errors
    ///
    /// Returns [`ReftrailError::NothingToUndo`] if the walk finds nothing.
    #[instrument(skip(self, store))]
    pub fn undo(&self, store: &mut RecordStore, force: bool) -> Result<RevertOutcome> {
        let history = HistoryWalker::new(self.git).entries()?;
        let target = match plan_undo(&history, force) {
            Some(entry) => entry,
            None => {
                warn!("Could not find a commit to undo");
                return Err(ReftrailError::NothingToUndo);
            }
        };
        debug!("Attempting to undo {}", target.sha);
        let commit = self.revert(&target.sha, UNDO_PREFIX)?;
        self.reload(store)?;

        info!("Undid {} ({})", short_sha(&target.sha), target.subject);
        Ok(RevertOutcome {
            kind: RevertKind::Undo,
            reverted: target.sha.clone(),
            reverted_subject: target.subject.clone(),
            commit,
        })
    }

    /// Redo the newest undo that was not redone yet and reload `store`
    ///
    /// # Errors
    ///
    /// Returns [`ReftrailError::NothingToRedo`] if the walk finds nothing.
    #[instrument(skip(self, store))]
    pub fn redo(&self, store: &mut RecordStore) -> Result<RevertOutcome> {
        let history = HistoryWalker::new(self.git).entries()?;
        let target = match plan_redo(&history) {
            Some(entry) => entry,
            None => {
                warn!("Could not find a commit to redo");
                return Err(ReftrailError::NothingToRedo);
            }
        };
        debug!("Attempting to redo {}", target.sha);
        let commit = self.revert(&target.sha, REDO_PREFIX)?;
        self.reload(store)?;

        info!("Redid {} ({})", short_sha(&target.sha), target.subject);
        Ok(RevertOutcome {
            kind: RevertKind::Redo,
            reverted: target.sha.clone(),
            reverted_subject: target.subject.clone(),
            commit,
        })
    }

    fn revert(&self, sha: &str, prefix: &str) -> Result<String> {
        if let Err(e) = self.git.revert_no_commit(sha) {
            error!(
                "Reverting {} was unsuccessful. Please consult the logs and git history of your database.",
                short_sha(sha)
            );
            if let Err(abort) = self.git.revert_abort() {
                debug!("Could not abort the revert: {}", abort);
            }
            return Err(e);
        }
        // reverting an empty commit stages nothing; the undo is still recorded
        self.git.commit(&format!("{}{}", prefix, sha), true)?;
        self.git.rev_parse("HEAD")
    }

    fn reload(&self, store: &mut RecordStore) -> Result<()> {
        if store.is_dirty() {
            warn!("Discarding {} unsaved entries while reloading", store.ledger().len());
        }
        store.read(false)?;
        Ok(())
    }
}
