//! # Reftrail - A versioned bibliography record store
//!
//! Reftrail keeps bibliographic records in a single flat YAML file and
//! versions every change with git, so that mutations can be undone, redone
//! and long-running workflows can pick up where they left off.
//!
//! ## Overview
//!
//! - Records live in memory in a [`RecordStore`], keyed by label
//! - Every mutation is registered in a dirty ledger; saving patches only the
//!   affected blocks of the record file and leaves every other byte alone
//! - Each mutating command is wrapped in an auto-commit whose body records
//!   the command's arguments as JSON
//! - Undo and redo are git reverts chosen by walking the commit history
//! - A resumable command reads its recorded arguments back from any commit
//!
//! ## Architecture
//!
//! ```text
//!   command ──► RecordStore ──► DirtyLedger ──► Persister ──► record file
//!      │                                                        │
//!      └──────────────► CommitRecorder ──► git ◄────────────────┘
//!                                           │
//!                  HistoryWalker ◄──────────┤
//!                  RevertEngine  ◄──────────┤  (undo / redo)
//!                  ResumeDecoder ◄──────────┘  (resume)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reftrail::{FieldValue, Record, ReftrailBuilder};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create the record file and start tracking it
//! let (mut reftrail, _report) = ReftrailBuilder::new("./library/literature.yaml")
//!     .git(true)
//!     .init(true)?;
//!
//! // Mutate the store directly and save (no commit)
//! let store = reftrail.store_mut();
//! let mut fields = BTreeMap::new();
//! fields.insert("author".to_string(), FieldValue::from("Albert Einstein"));
//! fields.insert("year".to_string(), FieldValue::Integer(1905));
//! store.update([Record::new("einstein1905", fields)]);
//! store.rename("einstein1905", "Einstein1905")?;
//! let summary = store.save()?;
//! println!("{} appended", summary.appended);
//! # Ok(())
//! # }
//! ```
//!
//! ## Record File
//!
//! One YAML document per record, delimited by explicit markers:
//!
//! ```text
//! ---
//! einstein1905:
//!   author: Albert Einstein
//!   year: 1905
//! ...
//! ```
//!
//! See [`record_file`] for the parsing and normalization rules.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, ReftrailError>`. Errors carry a category
//! ([`ReftrailError::is_user_input`], [`ReftrailError::is_vcs_unavailable`])
//! and a CLI exit code ([`ReftrailError::exit_code`]).
//!
//! ## Module Organization
//!
//! - [`store`]: the in-memory record collection
//! - [`persist`]: minimal-diff writes of pending mutations
//! - [`modify`]: bulk field changes, including relabeling
//! - [`commit`]: auto-commits and commit hooks
//! - [`history`], [`revert`]: undo and redo
//! - [`resume`]: recovering recorded arguments
//! - [`types`]: common types and configuration
//! - [`error`]: error types and handling

// Public API modules
pub mod cache;
pub mod commit;
pub mod error;
pub mod git;
pub mod history;
pub mod ledger;
pub mod modify;
pub mod persist;
pub mod record_file;
pub mod reftrail;
pub mod resume;
pub mod revert;
pub mod store;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use commit::{CommandInvocation, CommitHook, CommitRecorder, CommitStatus, NoOpHook};
pub use error::{ReftrailError, Result};
pub use history::{CommitKind, HistoryEntry, HistoryWalker};
pub use ledger::{DirtyLedger, LedgerTarget};
pub use modify::{Modification, ModifyChange, ModifyMode};
pub use persist::{PatchSummary, Persister};
pub use record_file::{BlockIndex, RecordFile};
pub use reftrail::{InitArgs, InitReport, Reftrail, ReftrailBuilder};
pub use resume::{MergePolicy, ResumeDecoder, ResumeOutcome};
pub use revert::{RevertEngine, RevertKind, RevertOutcome};
pub use store::RecordStore;
pub use types::*;

#[cfg(test)]
mod tests;
