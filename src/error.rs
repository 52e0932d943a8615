//! Error types for the reftrail library
//!
//! This module defines all error types that can occur while reading, mutating,
//! persisting and versioning a record store. Errors fall into a small number of
//! categories which callers (most notably the CLI) use to decide between
//! aborting, reporting and degrading to a no-op:
//!
//! - **Fatal preconditions**: the record file is missing on read
//! - **User-input errors**: unknown labels, label collisions, bad modifications
//! - **Version control unavailable**: tracking disabled or not initialized
//! - **History-shape anomalies**: nothing left to undo or redo
//! - **I/O and codec failures**: surfaced unchanged from the underlying crates

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the reftrail library
pub type Result<T> = std::result::Result<T, ReftrailError>;

/// Main error type for all reftrail operations
#[derive(Debug, Error)]
pub enum ReftrailError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during YAML serialization/deserialization of record blocks
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Errors while encoding or decoding the cache artifact
    #[error("Cache codec error: {0}")]
    CacheCodec(String),

    /// The record file does not exist
    #[error("Database file does not exist: {0:?}")]
    DatabaseMissing(PathBuf),

    /// A record block could not be understood
    #[error("Malformed record file at line {line}: {message}")]
    MalformedRecordFile {
        /// 1-based line number where the problem was detected
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// No record with this label exists in the store
    #[error("Label not found: {0}")]
    LabelNotFound(String),

    /// A record with this label already exists
    #[error("Label already exists: {0}")]
    LabelCollision(String),

    /// A bulk modification cannot be applied
    #[error("Invalid modification: {0}")]
    InvalidModification(String),

    /// Git tracking is disabled in the configuration
    #[error("Git tracking is disabled")]
    GitDisabled,

    /// Git tracking is enabled but the directory is not a work tree
    #[error("Git tracking is not initialized at: {0:?}")]
    GitNotInitialized(PathBuf),

    /// A git subprocess exited unsuccessfully
    #[error("git {command} failed with status {status}: {stderr}")]
    GitCommand {
        /// The git subcommand and its arguments
        command: String,
        /// Exit status (or -1 when terminated by a signal)
        status: i32,
        /// Captured standard error
        stderr: String,
    },

    /// The history contains no commit eligible for undo
    #[error("Could not find a commit to undo")]
    NothingToUndo,

    /// The history contains no commit eligible for redo
    #[error("Could not find a commit to redo")]
    NothingToRedo,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for ReftrailError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ReftrailError::CacheCodec(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for ReftrailError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ReftrailError::CacheCodec(err.to_string())
    }
}

impl ReftrailError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        ReftrailError::Internal(msg.into())
    }

    /// Create a malformed-file error for the given 0-based line index
    pub fn malformed(line_index: usize, msg: impl Into<String>) -> Self {
        ReftrailError::MalformedRecordFile {
            line: line_index + 1,
            message: msg.into(),
        }
    }

    /// Check if this error means version control cannot be used right now
    pub fn is_vcs_unavailable(&self) -> bool {
        matches!(
            self,
            ReftrailError::GitDisabled | ReftrailError::GitNotInitialized(_)
        )
    }

    /// Check if this error was caused by invalid user input
    ///
    /// The store is left unchanged whenever one of these is returned.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            ReftrailError::LabelNotFound(_)
                | ReftrailError::LabelCollision(_)
                | ReftrailError::InvalidModification(_)
        )
    }

    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReftrailError::NothingToUndo | ReftrailError::NothingToRedo => 2,
            e if e.is_vcs_unavailable() => 3,
            _ => 1,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ReftrailError::DatabaseMissing(path) => {
                format!("The database file {:?} does not exist! Please run `reftrail init`.", path)
            }
            ReftrailError::GitDisabled => {
                "Git tracking is disabled. Enable it in your configuration (\"git\": true) to use this command."
                    .to_string()
            }
            ReftrailError::GitNotInitialized(path) => {
                format!(
                    "Git tracking is configured but not initialized in {:?}. Run `reftrail init --git`.",
                    path
                )
            }
            ReftrailError::NothingToUndo => {
                "Could not find a commit to undo. Please commit something first!".to_string()
            }
            ReftrailError::NothingToRedo => {
                "Could not find a commit to redo. You must have undone something first!".to_string()
            }
            ReftrailError::LabelCollision(label) => {
                format!("The label '{}' already exists. Use --disambiguate to pick a free one.", label)
            }
            _ => self.to_string(),
        }
    }
}
