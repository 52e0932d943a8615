//! End-to-end tests for reftrail
//!
//! These tests drive a store through a whole mutate, commit, undo and redo
//! cycle against a throwaway git repository.

#[cfg(test)]
mod integration_tests {
    use crate::*;
    use serde::Serialize;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Edit {
        label: String,
    }

    impl CommandInvocation for Edit {
        fn name(&self) -> &str {
            "edit"
        }
    }

    fn tracked_dir() -> Option<TempDir> {
        if !git::Git::is_available() {
            return None;
        }
        let temp_dir = TempDir::new().unwrap();
        let git = git::Git::new(temp_dir.path());
        git.init().unwrap();
        git.set_config("user.name", "Test").unwrap();
        git.set_config("user.email", "test@example.com").unwrap();
        Some(temp_dir)
    }

    fn record(label: &str, title: &str) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::from(title));
        Record::new(label, fields)
    }

    #[test]
    fn test_basic_workflow() {
        let Some(dir) = tracked_dir() else { return };
        let file = dir.path().join("literature.yaml");

        let (mut reftrail, report) = ReftrailBuilder::new(&file).git(true).init(true).unwrap();
        assert!(report.created);
        assert!(matches!(report.commit, Some(CommitStatus::Committed { .. })));

        // add two records
        let (_, status) = reftrail
            .record(&Edit { label: "A".into() }, |store| {
                store.update([record("A", "alpha"), record("B", "beta")]);
                Ok(())
            })
            .unwrap();
        assert!(matches!(status, CommitStatus::Committed { .. }));
        let after_add = fs::read_to_string(&file).unwrap();

        // edit one of them
        reftrail
            .record(&Edit { label: "B".into() }, |store| {
                store.set_field("B", "year", FieldValue::Integer(1999))?;
                Ok(())
            })
            .unwrap();
        let after_edit = fs::read_to_string(&file).unwrap();
        let snapshot: Vec<Record> = reftrail.store().iter().cloned().collect();

        // undo restores the file and the store
        let outcome = reftrail.undo(false).unwrap();
        assert_eq!(outcome.kind, RevertKind::Undo);
        assert_eq!(fs::read_to_string(&file).unwrap(), after_add);
        assert!(reftrail.store().get("B").unwrap().get("year").is_none());

        // redo brings the edit back
        let outcome = reftrail.redo().unwrap();
        assert_eq!(outcome.kind, RevertKind::Redo);
        assert_eq!(fs::read_to_string(&file).unwrap(), after_edit);
        let restored: Vec<Record> = reftrail.store().iter().cloned().collect();
        assert_eq!(restored, snapshot);

        let history = reftrail.history(None).unwrap();
        assert_eq!(history.len(), 5);
        assert!(matches!(history[0].kind, CommitKind::Redo { .. }));
        assert!(history.last().unwrap().kind.is_init());
    }

    #[test]
    fn test_undo_without_tracking() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("literature.yaml");
        let (mut reftrail, report) = ReftrailBuilder::new(&file).init(false).unwrap();
        assert!(report.created);
        assert!(report.commit.is_none());

        let err = reftrail.undo(false).unwrap_err();
        assert!(err.is_vcs_unavailable());
        assert_eq!(err.exit_code(), 3);
    }
}
