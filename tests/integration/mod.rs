//! Integration tests for reftrail
//!
//! Drives whole command cycles (mutate, save, commit, undo, redo, resume)
//! against record files and throwaway git repositories.

use ::reftrail::git::Git;
use ::reftrail::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::info;

/// Whether the `git` executable can be run
pub fn git_available() -> bool {
    Git::is_available()
}

/// A generic recorded command used by the harness
#[derive(Debug, Clone, Serialize)]
pub struct TestCommand {
    #[serde(skip)]
    pub name: &'static str,
    pub labels: Vec<String>,
}

impl TestCommand {
    pub fn new(name: &'static str, labels: &[&str]) -> Self {
        Self {
            name,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl CommandInvocation for TestCommand {
    fn name(&self) -> &str {
        self.name
    }
}

/// Test harness owning a record file and (optionally) its repository
pub struct ReftrailTestHarness {
    pub temp_dir: TempDir,
    pub reftrail: Reftrail,
}

impl ReftrailTestHarness {
    /// A store without git tracking
    pub fn untracked() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("literature.yaml");
        let (reftrail, _) = ReftrailBuilder::new(file).init(false).unwrap();
        Self { temp_dir, reftrail }
    }

    /// A store tracked by a fresh repository, or `None` without git
    pub fn tracked() -> Option<Self> {
        if !git_available() {
            eprintln!("git is not available, skipping");
            return None;
        }
        let temp_dir = TempDir::new().unwrap();
        let git = Git::new(temp_dir.path());
        git.init().unwrap();
        git.set_config("user.name", "Reftrail Test").unwrap();
        git.set_config("user.email", "test@reftrail.invalid").unwrap();

        let file = temp_dir.path().join("literature.yaml");
        let (reftrail, report) = ReftrailBuilder::new(file).git(true).init(true).unwrap();
        assert!(matches!(report.commit, Some(CommitStatus::Committed { .. })));
        Some(Self { temp_dir, reftrail })
    }

    pub fn file(&self) -> PathBuf {
        self.reftrail.config().file.clone()
    }

    pub fn contents(&self) -> String {
        fs::read_to_string(self.file()).unwrap()
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.reftrail.store().iter().cloned().collect()
    }

    /// Add records through a recorded command
    pub fn add(&mut self, records: &[(&str, &str)]) -> CommitStatus {
        let labels: Vec<&str> = records.iter().map(|(l, _)| *l).collect();
        let records: Vec<Record> = records.iter().map(|(l, t)| record(l, t)).collect();
        let (_, status) = self
            .reftrail
            .record(&TestCommand::new("add", &labels), |store| {
                store.update(records);
                Ok(())
            })
            .unwrap();
        info!("add {:?}: {}", labels, status);
        status
    }

    /// Set one field through a recorded command
    pub fn edit(&mut self, label: &str, field: &str, value: FieldValue) -> CommitStatus {
        let (_, status) = self
            .reftrail
            .record(&TestCommand::new("edit", &[label]), |store| {
                store.set_field(label, field, value)?;
                Ok(())
            })
            .unwrap();
        status
    }

    pub fn git(&self) -> Git {
        Git::new(self.temp_dir.path())
    }
}

pub fn record(label: &str, title: &str) -> Record {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), FieldValue::from(title));
    fields.insert("year".to_string(), FieldValue::Integer(2000));
    Record::new(label, fields)
}

/// The serialized block of `label` as currently on disk
fn block_text(text: &str, label: &str) -> String {
    let file = RecordFile::from_text(text);
    let block = file.index().get(label).cloned().unwrap();
    file.lines()[block.lines].concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_pop_and_readd_appends() {
        let mut harness = ReftrailTestHarness::untracked();
        harness.add(&[("A", "alpha"), ("B", "beta")]);
        let before = harness.contents();
        let block_a = block_text(&before, "A");
        let block_b = block_text(&before, "B");
        assert_eq!(before, format!("{}{}", block_a, block_b));

        let store = harness.reftrail.store_mut();
        let rec_a = store.pop("A").unwrap();
        let summary = store.save().unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(harness.contents(), block_b);

        let store = harness.reftrail.store_mut();
        store.update([rec_a]);
        let summary = store.save().unwrap();
        assert_eq!(summary.appended, 1);
        assert_eq!(harness.contents(), format!("{}{}", block_b, block_a));
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut harness = ReftrailTestHarness::untracked();
        harness.add(&[("A", "alpha"), ("B", "beta"), ("D", "delta")]);
        let before = harness.contents();
        let block_a = block_text(&before, "A");
        let block_d = block_text(&before, "D");
        let fields_b = harness.reftrail.store().get("B").unwrap().disk_fields().len();

        let store = harness.reftrail.store_mut();
        store.rename("B", "C").unwrap();
        let summary = store.save().unwrap();
        assert_eq!(summary.replaced, 1);

        let after = harness.contents();
        let block_c = block_text(&after, "C");
        assert_eq!(after, format!("{}{}{}", block_a, block_c, block_d));
        assert_eq!(block_c, block_text(&before, "B").replacen("B:", "C:", 1));

        let labels: Vec<&str> = harness.reftrail.store().labels().collect();
        assert_eq!(labels, vec!["A", "C", "D"]);
        let renamed = harness.reftrail.store().get("C").unwrap();
        assert_eq!(renamed.get("ID"), Some(&FieldValue::from("C")));
        assert_eq!(renamed.disk_fields().len(), fields_b);
    }

    #[test]
    fn test_failed_mutation_leaves_file_untouched() {
        let mut harness = ReftrailTestHarness::untracked();
        harness.add(&[("A", "alpha")]);
        let before = harness.contents();

        let err = harness
            .reftrail
            .record(&TestCommand::new("rename", &["missing"]), |store| store.rename("missing", "other"))
            .unwrap_err();
        assert!(err.is_user_input());
        assert_eq!(harness.contents(), before);

        let err = harness
            .reftrail
            .record(&TestCommand::new("delete", &["A"]), |store| {
                store.pop("A")?;
                store.pop("A")?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ReftrailError::LabelNotFound(_)));
        assert_eq!(harness.contents(), before);
        // the pending removal survives for a retry
        assert!(harness.reftrail.store().is_dirty());
    }

    #[test]
    fn test_cache_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("cache");
        let file = temp_dir.path().join("literature.yaml");
        fs::write(&file, "---\nA:\n  title: alpha\n  year: '1999'\n...\n").unwrap();

        let mut reftrail = ReftrailBuilder::new(&file).cache_dir(Some(cache_dir.clone())).open().unwrap();
        assert!(!reftrail.store().diagnostics().is_empty());
        assert_eq!(reftrail.reload(false).unwrap(), ReadSource::Cache);
        assert!(reftrail.store().diagnostics().is_empty());

        // forcing a full parse brings the diagnostics back
        let diagnostics = reftrail.lint().unwrap();
        assert!(diagnostics.iter().any(|d| d.field.as_deref() == Some("year")));

        // an edited file invalidates the artifact
        fs::write(&file, "---\nB:\n  title: beta\n...\n").unwrap();
        assert_eq!(reftrail.reload(false).unwrap(), ReadSource::File);
        assert!(reftrail.store().contains("B"));
        assert!(!reftrail.store().contains("A"));
    }

    #[test]
    #[traced_test]
    fn test_undo_then_redo_restores_state() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        harness.add(&[("A", "alpha"), ("B", "beta")]);
        harness.edit("A", "journal", FieldValue::from("Annalen der Physik"));

        let snapshot = harness.snapshot();
        let contents = harness.contents();

        let undo = harness.reftrail.undo(false).unwrap();
        assert_eq!(undo.reverted_subject, "Auto-commit: EditCommand");
        assert!(harness.reftrail.store().get("A").unwrap().get("journal").is_none());

        let redo = harness.reftrail.redo().unwrap();
        assert_eq!(redo.reverted, undo.commit);
        assert_eq!(harness.snapshot(), snapshot);
        assert_eq!(harness.contents(), contents);
    }

    #[test]
    #[traced_test]
    fn test_repeated_undo_and_redo() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        let empty = harness.contents();
        harness.add(&[("A", "alpha")]);
        let after_first = harness.contents();
        harness.add(&[("B", "beta")]);
        let after_second = harness.contents();

        harness.reftrail.undo(false).unwrap();
        assert_eq!(harness.contents(), after_first);
        harness.reftrail.undo(false).unwrap();
        assert_eq!(harness.contents(), empty);
        assert!(harness.reftrail.store().is_empty());

        // the initialization commit is never undone
        let err = harness.reftrail.undo(false).unwrap_err();
        assert!(matches!(err, ReftrailError::NothingToUndo));
        assert_eq!(err.exit_code(), 2);

        harness.reftrail.redo().unwrap();
        assert_eq!(harness.contents(), after_first);
        harness.reftrail.redo().unwrap();
        assert_eq!(harness.contents(), after_second);

        let err = harness.reftrail.redo().unwrap_err();
        assert!(matches!(err, ReftrailError::NothingToRedo));
        assert_eq!(err.exit_code(), 2);

        let kinds: Vec<String> = harness
            .reftrail
            .history(None)
            .unwrap()
            .iter()
            .map(|e| e.kind.to_string())
            .collect();
        assert_eq!(kinds.len(), 7);
        assert!(kinds[0].starts_with("redo"));
        assert_eq!(kinds[6], "InitCommand");
    }

    #[test]
    fn test_undo_skips_foreign_commits() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        harness.add(&[("A", "alpha")]);

        // a manual commit touching another file
        let notes = harness.temp_dir.path().join("notes.txt");
        fs::write(&notes, "reading list\n").unwrap();
        let git = harness.git();
        git.add(&notes).unwrap();
        git.commit("Add reading notes", false).unwrap();

        let outcome = harness.reftrail.undo(false).unwrap();
        assert_eq!(outcome.reverted_subject, "Auto-commit: AddCommand");
        assert!(harness.reftrail.store().is_empty());
        assert!(notes.exists());

        let outcome = harness.reftrail.undo(true).unwrap();
        assert_eq!(outcome.reverted_subject, "Add reading notes");
        assert!(!notes.exists());
    }

    #[test]
    fn test_commit_message_records_arguments() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        let status = harness.add(&[("A", "alpha")]);
        let CommitStatus::Committed { sha } = &status else { panic!("expected a commit, got {status}") };

        let message = harness.git().message(sha).unwrap();
        assert!(message.starts_with("Auto-commit: AddCommand\n\n{"));
        assert!(message.contains("\"labels\""));
        assert!(!message.contains("\"name\""));

        // saving nothing creates no commit
        let (_, status) = harness
            .reftrail
            .record(&TestCommand::new("edit", &[]), |_| Ok(()))
            .unwrap();
        assert_eq!(status, CommitStatus::NoChanges);
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct ReviewArgs {
        filter: Vec<String>,
        done: Vec<String>,
        resume: Option<String>,
    }

    impl CommandInvocation for ReviewArgs {
        fn name(&self) -> &str {
            "review"
        }

        fn allow_empty(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_resume_review() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        let recorded = ReviewArgs {
            filter: vec!["a".into()],
            done: vec!["x".into()],
            resume: None,
        };
        let (_, status) = harness.reftrail.record(&recorded, |_| Ok(())).unwrap();
        let CommitStatus::Committed { sha } = status else { panic!("review must always commit") };

        let mut args = ReviewArgs {
            resume: Some("HEAD".into()),
            ..Default::default()
        };
        let policy = MergePolicy::new().carry_forward("done");
        let outcome = harness.reftrail.resume_into("HEAD", &mut args, &policy);
        let ResumeOutcome::Merged { sha: resumed, fields } = outcome else { panic!("not merged") };
        assert_eq!(resumed, sha);
        assert!(!fields.contains(&"resume".to_string()));
        assert_eq!(args.filter, vec!["a"]);
        assert_eq!(args.done, vec!["x"]);
        assert_eq!(args.resume.as_deref(), Some("HEAD"));

        // progress made in this session is kept alongside the recorded one
        let mut args = ReviewArgs {
            filter: vec!["b".into()],
            done: vec!["y".into()],
            resume: Some(sha.clone()),
        };
        let policy = policy.explicit("filter");
        assert!(harness.reftrail.resume_into(&sha, &mut args, &policy).is_merged());
        assert_eq!(args.filter, vec!["b"]);
        assert_eq!(args.done, vec!["x", "y"]);
    }

    #[test]
    fn test_resume_failures_leave_arguments() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        harness.add(&[("A", "alpha")]);
        harness.reftrail.undo(false).unwrap();

        let original = ReviewArgs {
            filter: vec!["keep".into()],
            ..Default::default()
        };
        let policy = MergePolicy::new();

        let mut args = original.clone();
        let outcome = harness.reftrail.resume_into("no-such-ref", &mut args, &policy);
        assert_eq!(outcome, ResumeOutcome::UnknownCommit("no-such-ref".into()));
        assert_eq!(args, original);

        // the undo commit carries no argument body
        let outcome = harness.reftrail.resume_into("HEAD", &mut args, &policy);
        assert_eq!(outcome, ResumeOutcome::Undecodable("HEAD".into()));
        assert_eq!(args, original);

        let untracked = ReftrailTestHarness::untracked();
        let outcome = untracked.reftrail.resume_into("HEAD", &mut args, &policy);
        assert_eq!(outcome, ResumeOutcome::Disabled);
    }

    #[test]
    fn test_tracking_configured_but_not_initialized() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("literature.yaml");
        fs::write(&file, "").unwrap();
        let mut reftrail = ReftrailBuilder::new(&file).git(true).open().unwrap();
        if Git::new(temp_dir.path()).is_inside_work_tree() {
            // temp directory happens to live inside a repository
            return;
        }

        let (_, status) = reftrail
            .record(&TestCommand::new("add", &["A"]), |store| {
                store.update([record("A", "alpha")]);
                Ok(())
            })
            .unwrap();
        // the mutation is saved even though nothing is committed
        assert_eq!(status, CommitStatus::NotInitialized);
        assert!(fs::read_to_string(&file).unwrap().contains("A:"));

        let err = reftrail.undo(false).unwrap_err();
        assert!(matches!(err, ReftrailError::GitNotInitialized(_)));
        assert_eq!(err.exit_code(), 3);
    }

    struct Trailer;

    impl CommitHook for Trailer {
        fn pre_commit(&self, message: &str, _args: &serde_json::Value) -> Option<String> {
            Some(format!("{}\n\nReviewed-by: hook", message))
        }
    }

    #[test]
    fn test_hook_trailer_does_not_break_resume() {
        let Some(mut harness) = ReftrailTestHarness::tracked() else { return };
        harness.reftrail.add_hook(Box::new(Trailer));
        let recorded = ReviewArgs {
            done: vec!["x".into()],
            ..Default::default()
        };
        harness.reftrail.record(&recorded, |_| Ok(())).unwrap();

        let message = harness.git().message("HEAD").unwrap();
        assert!(message.contains("Reviewed-by: hook"));

        let mut args = ReviewArgs::default();
        assert!(harness.reftrail.resume_into("HEAD", &mut args, &MergePolicy::new()).is_merged());
        assert_eq!(args.done, vec!["x"]);
    }

    #[test]
    fn test_cache_ignores_timestamps() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("literature.yaml");
        fs::write(&file, "---\nA:\n  title: alpha\n...\n")?;
        let mut store = RecordStore::new(StoreConfig {
            cache_dir: Some(temp_dir.path().join("cache")),
            ..StoreConfig::for_file(&file)
        });
        assert_eq!(store.read(false)?, ReadSource::File);

        // touching the file keeps the artifact valid
        let later = filetime::FileTime::from_unix_time(2_000_000_000, 0);
        filetime::set_file_mtime(&file, later)?;
        assert_eq!(store.read(false)?, ReadSource::Cache);

        // a same-length edit with the old timestamp restored is still noticed
        fs::write(&file, "---\nA:\n  title: omega\n...\n")?;
        filetime::set_file_mtime(&file, later)?;
        assert_eq!(store.read(false)?, ReadSource::File);
        assert_eq!(store.get("A").unwrap().get("title"), Some(&FieldValue::from("omega")));
        Ok(())
    }
}
