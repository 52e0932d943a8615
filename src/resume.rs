//! Resuming a command from the arguments recorded in a past commit
//!
//! Long interactive workflows record their progress in the JSON body of
//! their auto-commits. [`ResumeDecoder`] reads that body back from any
//! commit reference and merges it into the arguments of the current
//! invocation according to a [`MergePolicy`]:
//!
//! - the `resume` field itself is never merged
//! - carry-forward fields (e.g. a list of already completed labels) are
//!   merged as a union, so progress from both invocations is kept
//! - fields given explicitly on the current command line are kept
//! - every other decoded field overwrites the current value
//!
//! Resuming never fails to the caller. Each reason for not resuming is
//! logged and reported as a [`ResumeOutcome`] variant, and the current
//! arguments are left as they were.

use crate::error::{ReftrailError, Result};
use crate::git::Git;
use crate::types::StoreConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{error, info, instrument};

/// Argument field holding the resume reference
pub const RESUME_FIELD: &str = "resume";

/// How decoded fields are combined with the current arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePolicy {
    explicit: BTreeSet<String>,
    carry_forward: BTreeSet<String>,
}

impl MergePolicy {
    /// Overwrite everything except the resume field
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the current value of `field`
    pub fn explicit(mut self, field: impl Into<String>) -> Self {
        self.explicit.insert(field.into());
        self
    }

    /// Merge `field` as a union of both lists
    pub fn carry_forward(mut self, field: impl Into<String>) -> Self {
        self.carry_forward.insert(field.into());
        self
    }

    fn merge(&self, current: &mut Map<String, Value>, decoded: Map<String, Value>) -> Vec<String> {
        let mut merged = Vec::new();
        for (key, value) in decoded {
            if key == RESUME_FIELD {
                continue;
            }
            if self.carry_forward.contains(&key) {
                let combined = union(value, current.remove(&key));
                current.insert(key.clone(), combined);
            } else if self.explicit.contains(&key) && current.contains_key(&key) {
                continue;
            } else {
                current.insert(key.clone(), value);
            }
            merged.push(key);
        }
        merged
    }
}

fn union(decoded: Value, current: Option<Value>) -> Value {
    match (decoded, current) {
        (Value::Array(mut items), Some(Value::Array(extra))) => {
            for item in extra {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            Value::Array(items)
        }
        (Value::Null, Some(current)) => current,
        (decoded, _) => decoded,
    }
}

/// Why a resume did or did not happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Fields were merged from the commit `sha`
    Merged {
        /// Resolved sha of the resumed commit
        sha: String,
        /// Names of the fields taken from the commit
        fields: Vec<String>,
    },
    /// Git tracking is disabled
    Disabled,
    /// Git tracking is enabled but not initialized
    NotInitialized,
    /// The reference does not resolve to a commit
    UnknownCommit(String),
    /// The commit body is not a recorded argument object
    Undecodable(String),
}

impl ResumeOutcome {
    /// Whether arguments were merged
    pub fn is_merged(&self) -> bool {
        matches!(self, ResumeOutcome::Merged { .. })
    }
}

/// Reads recorded arguments back from the history
#[derive(Debug, Clone)]
pub struct ResumeDecoder {
    config: StoreConfig,
}

impl ResumeDecoder {
    /// Create a decoder for the store described by `config`
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Resolve `reference` and decode its commit body
    pub fn decode(&self, reference: &str) -> Result<(String, Map<String, Value>)> {
        let git = Git::for_store(&self.config)?;
        let sha = git.rev_parse(reference)?;
        let message = git.message(&sha)?;
        let object = decode_body(&message)?;
        Ok((sha, object))
    }

    /// Merge the arguments recorded in `reference` into `args`
    ///
    /// `args` must be a JSON object. It is only modified when the outcome is
    /// [`ResumeOutcome::Merged`].
    #[instrument(skip(self, args, policy))]
    pub fn resume(&self, reference: &str, args: &mut Value, policy: &MergePolicy) -> ResumeOutcome {
        info!("Trying to resume from {}", reference);
        let current = match args {
            Value::Object(map) => map,
            _ => {
                error!("Cannot resume into arguments that are not an object");
                return ResumeOutcome::Undecodable(reference.to_string());
            }
        };

        match self.decode(reference) {
            Ok((sha, decoded)) => {
                info!("Found the commit from which to resume");
                let fields = policy.merge(current, decoded);
                ResumeOutcome::Merged { sha, fields }
            }
            Err(ReftrailError::GitDisabled) => {
                error!("You must enable git tracking in order to resume a previous command.");
                ResumeOutcome::Disabled
            }
            Err(ReftrailError::GitNotInitialized(_)) => {
                error!("You have configured, but not initialized git tracking. Run `reftrail init --git`.");
                ResumeOutcome::NotInitialized
            }
            Err(ReftrailError::GitCommand { .. }) => {
                error!("Could not find the requested commit: '{}'", reference);
                ResumeOutcome::UnknownCommit(reference.to_string())
            }
            Err(e) => {
                error!("Could not extract arguments from commit '{}': {}", reference, e);
                ResumeOutcome::Undecodable(reference.to_string())
            }
        }
    }

    /// Typed variant of [`ResumeDecoder::resume`]
    ///
    /// The merged object must deserialize back into `T`; otherwise `args`
    /// is left unchanged and the outcome is [`ResumeOutcome::Undecodable`].
    pub fn resume_into<T>(&self, reference: &str, args: &mut T, policy: &MergePolicy) -> ResumeOutcome
    where
        T: Serialize + DeserializeOwned,
    {
        let mut value = match serde_json::to_value(&*args) {
            Ok(value) => value,
            Err(e) => {
                error!("Could not encode the current arguments: {}", e);
                return ResumeOutcome::Undecodable(reference.to_string());
            }
        };
        let outcome = self.resume(reference, &mut value, policy);
        if outcome.is_merged() {
            match serde_json::from_value::<T>(value) {
                Ok(merged) => *args = merged,
                Err(e) => {
                    error!("The arguments recorded in '{}' do not fit this command: {}", reference, e);
                    return ResumeOutcome::Undecodable(reference.to_string());
                }
            }
        }
        outcome
    }
}

/// Decode the argument object from a full commit message
///
/// The subject line is skipped and the first JSON value of the remaining
/// body is read; trailing text (e.g. trailers added by a hook) is ignored.
pub fn decode_body(message: &str) -> Result<Map<String, Value>> {
    let body = message.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    let mut values = serde_json::Deserializer::from_str(body.trim_start()).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(map))) => Ok(map),
        Some(Ok(_)) => Err(ReftrailError::internal("commit body is not an argument object")),
        Some(Err(e)) => Err(e.into()),
        None => Err(ReftrailError::internal("commit has no body")),
    }
}
