//! Process boundary to `git`
//!
//! All version control goes through the `git` executable, run synchronously
//! with `git -C <root> ...`. Exit status and standard error are captured and
//! a failing invocation becomes [`ReftrailError::GitCommand`]; nothing is
//! retried.

use crate::error::{ReftrailError, Result};
use crate::types::StoreConfig;
use chrono::{DateTime, FixedOffset};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

/// One line of `git log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Full commit sha
    pub sha: String,
    /// Subject line
    pub subject: String,
    /// Author date, when requested
    pub date: Option<DateTime<FixedOffset>>,
}

/// A git work tree rooted at a directory
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    /// Operate on the repository containing `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open git tracking for a store
    ///
    /// # Errors
    ///
    /// - [`ReftrailError::GitDisabled`] if tracking is off in `config`
    /// - [`ReftrailError::GitNotInitialized`] if the record file's directory
    ///   is not a (non-ignored) work tree
    pub fn for_store(config: &StoreConfig) -> Result<Self> {
        if !config.git {
            return Err(ReftrailError::GitDisabled);
        }
        let git = Git::new(config.root());
        if !git.is_inside_work_tree() {
            return Err(ReftrailError::GitNotInitialized(git.root.clone()));
        }
        Ok(git)
    }

    /// Directory passed to `git -C`
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a `git` executable can be run at all
    pub fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.arg("--no-pager").arg("-C").arg(&self.root).args(args);
        cmd
    }

    fn output<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<OsStr>,
    {
        let rendered = args
            .clone()
            .into_iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        trace!("git -C {:?} {}", self.root, rendered);
        Ok(self.command(args).output()?)
    }

    /// Run git and return its standard output, failing on non-zero status
    pub fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<OsStr>,
    {
        let output = self.output(args.clone())?;
        if !output.status.success() {
            let command = args
                .into_iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            return Err(ReftrailError::GitCommand {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Whether the root is inside a work tree and not ignored by it
    pub fn is_inside_work_tree(&self) -> bool {
        let inside = match self.output(["rev-parse", "--is-inside-work-tree"]) {
            Ok(o) => o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true",
            Err(_) => false,
        };
        if !inside {
            return false;
        }
        // check-ignore exits 0 when the path is ignored
        let root = self.root.to_string_lossy().into_owned();
        match self.output(["check-ignore", "--quiet", root.as_str()]) {
            Ok(o) => !o.status.success(),
            Err(_) => false,
        }
    }

    /// Initialize a repository at the root
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        self.run(["init", "--quiet"])?;
        debug!("Initialized git repository in {:?}", self.root);
        Ok(())
    }

    /// Set a repository-local configuration value
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.run(["config", key, value])?;
        Ok(())
    }

    /// Stage one path
    pub fn add(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy().into_owned();
        self.run(["add", "--", path.as_str()])?;
        Ok(())
    }

    /// Whether the index differs from HEAD
    pub fn has_staged_changes(&self) -> Result<bool> {
        if !self.has_commits() {
            let staged = self.run(["ls-files", "--cached"])?;
            return Ok(!staged.trim().is_empty());
        }
        let output = self.output(["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            status => Err(ReftrailError::GitCommand {
                command: "diff --cached --quiet".to_string(),
                status: status.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// Create a commit from the index
    pub fn commit(&self, message: &str, allow_empty: bool) -> Result<()> {
        let mut args = vec!["commit", "--no-gpg-sign", "--quiet"];
        if allow_empty {
            args.push("--allow-empty");
        }
        args.push("--message");
        args.push(message);
        self.run(args)?;
        Ok(())
    }

    /// Whether HEAD points at a commit
    pub fn has_commits(&self) -> bool {
        self.output(["rev-parse", "--verify", "--quiet", "HEAD"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// One-line log, newest first
    ///
    /// A repository without commits has an empty log.
    pub fn log_oneline(&self) -> Result<Vec<LogLine>> {
        if !self.has_commits() {
            return Ok(Vec::new());
        }
        let stdout = self.run(["log", "--oneline", "--no-decorate", "--no-abbrev"])?;
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let (sha, subject) = line.split_once(' ').unwrap_or((line, ""));
                LogLine {
                    sha: sha.to_string(),
                    subject: subject.to_string(),
                    date: None,
                }
            })
            .collect())
    }

    /// Log with author dates, newest first, at most `limit` entries
    pub fn log_detailed(&self, limit: Option<usize>) -> Result<Vec<LogLine>> {
        if !self.has_commits() {
            return Ok(Vec::new());
        }
        let mut args = vec!["log".to_string(), "--format=%H%x09%aI%x09%s".to_string()];
        if let Some(n) = limit {
            args.push(format!("--max-count={}", n));
        }
        let stdout = self.run(&args)?;
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                let sha = parts.next()?;
                let date = parts.next().and_then(|d| DateTime::parse_from_rfc3339(d).ok());
                let subject = parts.next().unwrap_or("");
                Some(LogLine {
                    sha: sha.to_string(),
                    subject: subject.to_string(),
                    date,
                })
            })
            .collect())
    }

    /// Apply the inverse of `sha` to the work tree and index
    pub fn revert_no_commit(&self, sha: &str) -> Result<()> {
        self.run(["revert", "--no-commit", sha])?;
        Ok(())
    }

    /// Abandon an in-progress revert
    pub fn revert_abort(&self) -> Result<()> {
        self.run(["revert", "--abort"])?;
        Ok(())
    }

    /// Full message of the commit `reference` resolves to
    pub fn message(&self, reference: &str) -> Result<String> {
        self.run(["log", "--format=%B", "-n1", reference, "--"])
    }

    /// Resolve `reference` to a full sha
    pub fn rev_parse(&self, reference: &str) -> Result<String> {
        let revision = format!("{}^{{commit}}", reference);
        Ok(self.run(["rev-parse", "--verify", "--quiet", revision.as_str()])?.trim().to_string())
    }
}
