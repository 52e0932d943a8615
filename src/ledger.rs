//! Pending label-level mutations since the last save
//!
//! The ledger maps an *old* label (the key of a block as it currently exists
//! in the record file, or a label that never made it to disk) to what must
//! become of it:
//!
//! - `old -> Label(old)`: insert or refresh the record
//! - `old -> Label(new)`: the record was renamed
//! - `old -> Removed`: the record was deleted
//!
//! Entries keep their first insertion position when overwritten, so the
//! persister processes them in the order the labels were first touched.
//! Once a label was renamed away, a later mark on the same label concerns a
//! different record and gets an entry of its own.

/// What a ledger entry asks the persister to do with a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTarget {
    /// Write the in-memory record currently keyed by this label
    Label(String),
    /// Remove the block
    Removed,
}

impl LedgerTarget {
    /// The target label, unless the entry is a removal
    pub fn label(&self) -> Option<&str> {
        match self {
            LedgerTarget::Label(label) => Some(label),
            LedgerTarget::Removed => None,
        }
    }
}

/// Ordered mapping from old label to [`LedgerTarget`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyLedger {
    entries: Vec<(String, LedgerTarget)>,
}

impl DirtyLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old` must become `target`
    pub fn mark(&mut self, old: impl Into<String>, target: LedgerTarget) {
        let old = old.into();
        let latest = self.entries.iter().rposition(|(key, _)| *key == old);
        match latest {
            Some(i) if !is_rename(&self.entries[i].0, &self.entries[i].1) => self.entries[i].1 = target,
            _ => self.entries.push((old, target)),
        }
    }

    /// Record an insert or in-place update of `label`
    pub fn mark_updated(&mut self, label: &str) {
        self.mark(label, LedgerTarget::Label(label.to_string()));
    }

    /// Record the removal of `label`
    pub fn mark_removed(&mut self, label: &str) {
        self.mark(label, LedgerTarget::Removed);
    }

    /// Record a rename of `old` to `new`
    pub fn mark_renamed(&mut self, old: &str, new: &str) {
        self.mark(old, LedgerTarget::Label(new.to_string()));
    }

    /// Latest target recorded for `old`
    pub fn get(&self, old: &str) -> Option<&LedgerTarget> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key == old)
            .map(|(_, target)| target)
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerTarget)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget all pending entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn is_rename(old: &str, target: &LedgerTarget) -> bool {
    matches!(target, LedgerTarget::Label(new) if new != old)
}
