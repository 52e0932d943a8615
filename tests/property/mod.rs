//! Property-based testing for reftrail
//!
//! Uses proptest to check persistence and labeling invariants across
//! randomly generated stores and mutation sequences.

use ::reftrail::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tempfile::TempDir;

/// A store mutation
#[derive(Debug, Clone)]
pub enum StoreOperation {
    Update { label: String, title: String },
    SetField { label: String, value: i64 },
    Pop { label: String },
    Rename { old: String, new: String },
}

fn label_strategy() -> impl Strategy<Value = String> {
    prop_oneof!["[a-f]", "[a-f][0-9]", "knuth19[0-9]{2}"]
}

fn title_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z ]{0,20}[A-Za-z]"
}

fn operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        (label_strategy(), title_strategy()).prop_map(|(label, title)| StoreOperation::Update { label, title }),
        (label_strategy(), any::<i64>()).prop_map(|(label, value)| StoreOperation::SetField { label, value }),
        label_strategy().prop_map(|label| StoreOperation::Pop { label }),
        (label_strategy(), label_strategy()).prop_map(|(old, new)| StoreOperation::Rename { old, new }),
    ]
}

fn make_record(label: &str, title: &str) -> Record {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), FieldValue::from(title));
    Record::new(label, fields)
}

/// Apply an operation, ignoring user-input errors
///
/// Returns the labels whose blocks the operation may touch.
fn apply(store: &mut RecordStore, op: &StoreOperation) -> Vec<String> {
    match op {
        StoreOperation::Update { label, title } => {
            store.update([make_record(label, title)]);
            vec![label.clone()]
        }
        StoreOperation::SetField { label, value } => {
            let _ = store.set_field(label, "volume", FieldValue::Integer(*value));
            vec![label.clone()]
        }
        StoreOperation::Pop { label } => {
            let _ = store.pop(label);
            vec![label.clone()]
        }
        StoreOperation::Rename { old, new } => {
            let _ = store.rename(old, new);
            vec![old.clone(), new.clone()]
        }
    }
}

fn blocks_of(text: &str) -> BTreeMap<String, String> {
    let file = RecordFile::from_text(text);
    file.index()
        .blocks()
        .iter()
        .map(|b| (b.label.clone(), file.lines()[b.lines.clone()].concat()))
        .collect()
}

fn seeded_store(initial: &[(String, String)]) -> (TempDir, RecordStore) {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("literature.yaml");
    fs::write(&file, "").unwrap();
    let mut store = RecordStore::new(StoreConfig::for_file(&file));
    store.read(false).unwrap();
    store.update(initial.iter().map(|(l, t)| make_record(l, t)));
    store.save().unwrap();
    (temp_dir, store)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_untouched_blocks_are_byte_identical(
        initial in prop::collection::vec((label_strategy(), title_strategy()), 1..8),
        ops in prop::collection::vec(operation_strategy(), 1..10),
    ) {
        let (_dir, mut store) = seeded_store(&initial);
        let before = fs::read_to_string(store.path()).unwrap();

        let mut touched = BTreeSet::new();
        for op in &ops {
            touched.extend(apply(&mut store, op));
        }
        store.save().unwrap();
        let after = fs::read_to_string(store.path()).unwrap();

        let after_blocks = blocks_of(&after);
        for (label, block) in blocks_of(&before) {
            if !touched.contains(&label) {
                prop_assert_eq!(after_blocks.get(&label), Some(&block));
                prop_assert!(after.contains(&block));
            }
        }
    }

    #[test]
    fn prop_saved_file_matches_store(
        initial in prop::collection::vec((label_strategy(), title_strategy()), 0..8),
        ops in prop::collection::vec(operation_strategy(), 0..12),
    ) {
        let (_dir, mut store) = seeded_store(&initial);
        for op in &ops {
            apply(&mut store, op);
        }
        store.save().unwrap();
        prop_assert!(!store.is_dirty());

        let mut reread = RecordStore::new(store.config().clone());
        reread.read(true).unwrap();
        let mut expected: Vec<&Record> = store.iter().collect();
        let mut actual: Vec<&Record> = reread.iter().collect();
        expected.sort_by(|a, b| a.label().cmp(b.label()));
        actual.sort_by(|a, b| a.label().cmp(b.label()));
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn prop_disambiguation_is_fresh_and_deterministic(
        labels in prop::collection::btree_set(label_strategy(), 0..12),
        candidate in label_strategy(),
        separator in "[_-]",
        suffix in prop_oneof![Just(LabelSuffix::Alpha), Just(LabelSuffix::Capital), Just(LabelSuffix::Numeric)],
    ) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = StoreConfig::for_file(temp_dir.path().join("db.yaml"));
        config.label_suffix = LabelSuffixConfig { separator, kind: suffix };
        let mut store = RecordStore::new(config);
        store.update(labels.iter().map(|l| make_record(l, "x")));

        let first = store.disambiguate_label(&candidate, None);
        let second = store.disambiguate_label(&candidate, None);
        prop_assert_eq!(&first, &second);
        prop_assert!(!store.contains(&first));
        if !labels.contains(&candidate) {
            prop_assert_eq!(&first, &candidate);
        }

        // a record keeps its own label
        if let Some(own) = labels.iter().next() {
            let record = store.get(own).unwrap().clone();
            prop_assert_eq!(store.disambiguate_label(own, Some(&record)), own.clone());
        }
    }

    #[test]
    fn prop_suffix_reverse(n in 1usize..100_000) {
        for suffix in [LabelSuffix::Alpha, LabelSuffix::Capital, LabelSuffix::Numeric] {
            prop_assert_eq!(suffix.reverse(&suffix.suffix(n)), Some(n));
        }
    }
}
