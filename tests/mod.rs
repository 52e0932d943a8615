//! Main test module for reftrail
//!
//! This module includes all test suites:
//! - Integration tests for store, commit, undo/redo and resume scenarios
//! - Property-based tests for persistence and label invariants
//! - Edge cases of the record file format

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::reftrail::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn open(text: &str) -> (TempDir, RecordStore) {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("literature.yaml");
        fs::write(&file, text).unwrap();
        let mut store = RecordStore::new(StoreConfig::for_file(&file));
        store.read(false).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_empty_file() {
        let (_dir, mut store) = open("");
        assert!(store.is_empty());

        let summary = store.save().unwrap();
        assert!(!summary.has_changes());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "");
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = RecordStore::new(StoreConfig::for_file(temp_dir.path().join("absent.yaml")));
        let err = store.read(false).unwrap_err();
        assert!(matches!(err, ReftrailError::DatabaseMissing(_)));
        assert!(err.user_message().contains("init"));
    }

    #[test]
    fn test_crlf_and_comments_survive() {
        let text = "# my library\r\n---\r\nA:\r\n  title: alpha\r\n...\r\n---\r\nB:\r\n  title: beta\r\n...\r\n";
        let (_dir, mut store) = open(text);
        assert_eq!(store.len(), 2);

        store.set_field("B", "year", FieldValue::Integer(2001)).unwrap();
        store.save().unwrap();

        let written = fs::read_to_string(store.path()).unwrap();
        assert!(written.starts_with("# my library\r\n---\r\nA:\r\n  title: alpha\r\n...\r\n"));
        assert!(written.contains("year: 2001"));
    }

    #[test]
    fn test_unicode_labels_and_values() {
        let (_dir, mut store) = open("");
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::from("Über die Elektrodynamik bewegter Körper"));
        fields.insert("keywords".to_string(), FieldValue::List(vec!["相対性".into(), "физика".into()]));
        store.update([Record::new("Einstein1905ü", fields.clone())]);
        store.save().unwrap();

        let mut reread = RecordStore::new(store.config().clone());
        reread.read(true).unwrap();
        let record = reread.get("Einstein1905ü").unwrap();
        assert_eq!(record.get("title"), fields.get("title"));
        assert_eq!(record.get("keywords"), fields.get("keywords"));
    }

    #[test]
    fn test_missing_trailing_newline() {
        let (_dir, mut store) = open("---\nA:\n  title: alpha\n...");
        store.update([Record::new("B", BTreeMap::new())]);
        store.save().unwrap();

        let written = fs::read_to_string(store.path()).unwrap();
        assert!(written.starts_with("---\nA:\n  title: alpha\n...\n---\nB:"));
    }

    #[test]
    fn test_duplicate_labels_warn() {
        let (_dir, mut store) = open("---\nA:\n  title: first\n...\n---\nA:\n  title: second\n...\n");
        store.read(true).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("A").unwrap().get("title"), Some(&FieldValue::from("second")));
        assert!(store
            .diagnostics()
            .iter()
            .any(|d| d.severity == Severity::Warning && d.label.as_deref() == Some("A")));
    }
}

// Re-export test utilities for use in other suites
pub use integration::{git_available, ReftrailTestHarness};
