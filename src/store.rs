//! In-memory record store
//!
//! A [`RecordStore`] holds the records of one record file keyed by label, in
//! file order, together with the [`DirtyLedger`] of mutations made since the
//! last save. The in-memory state is always fully updated before a mutation
//! is registered in the ledger, so `save` only has to consult the ledger to
//! know which blocks of the file to touch.
//!
//! ## Lifecycle
//!
//! ```text
//! new(config) ──► read() ──► update / pop / rename / set_field ──► save()
//!                   ▲                                               │
//!                   └──────────── (undo / redo reload) ◄────────────┘
//! ```
//!
//! `read` replaces the whole in-memory state with the file's contents and
//! forgets any pending mutations. `clear` empties the store without touching
//! the file.

use crate::cache::RecordCache;
use crate::error::{ReftrailError, Result};
use crate::ledger::DirtyLedger;
use crate::persist::{PatchSummary, Persister};
use crate::record_file::{BlockIndex, RecordFile};
use crate::types::{Diagnostic, FieldValue, ReadSource, Record, StoreConfig};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// The record collection of one record file
#[derive(Debug)]
pub struct RecordStore {
    config: StoreConfig,
    records: HashMap<String, Record>,
    order: Vec<String>,
    ledger: DirtyLedger,
    cache: Option<RecordCache>,
    diagnostics: Vec<Diagnostic>,
}

impl RecordStore {
    /// Create an empty store for the configured record file
    ///
    /// Nothing is read until [`RecordStore::read`] is called.
    pub fn new(config: StoreConfig) -> Self {
        let cache = config.cache_dir.as_ref().map(RecordCache::new);
        Self {
            config,
            records: HashMap::new(),
            order: Vec::new(),
            ledger: DirtyLedger::new(),
            cache,
            diagnostics: Vec::new(),
        }
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.config.file
    }

    /// Load the record file into memory
    ///
    /// Uses the cache artifact when caching is enabled, `bypass_cache` is
    /// false and the artifact matches the file content. Otherwise the file is
    /// parsed in full, normalization diagnostics are emitted and retained,
    /// and a fresh artifact is written.
    ///
    /// # Errors
    ///
    /// Returns [`ReftrailError::DatabaseMissing`] if the record file does
    /// not exist. The in-memory state is left untouched in that case.
    #[instrument(skip(self), fields(file = ?self.config.file))]
    pub fn read(&mut self, bypass_cache: bool) -> Result<ReadSource> {
        let content = match fs::read(&self.config.file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReftrailError::DatabaseMissing(self.config.file.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        if !bypass_cache {
            if let Some(records) = self
                .cache
                .as_ref()
                .and_then(|cache| cache.load(&self.config.file, &content))
            {
                self.install(records);
                self.diagnostics.clear();
                return Ok(ReadSource::Cache);
            }
        }

        info!("Loading database file: {:?}", self.config.file);
        let text = std::str::from_utf8(&content)
            .map_err(|e| ReftrailError::malformed(0, format!("file is not valid UTF-8: {}", e)))?;
        let (records, diagnostics) = RecordFile::from_text(text).parse()?;
        for diagnostic in &diagnostics {
            diagnostic.emit();
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&self.config.file, &content, &records) {
                warn!("Failed to write cache artifact: {}", e);
            }
        }

        self.install(records);
        self.diagnostics = diagnostics;
        Ok(ReadSource::File)
    }

    fn install(&mut self, records: Vec<Record>) {
        self.records.clear();
        self.order.clear();
        self.ledger.clear();
        for record in records {
            let label = record.label().to_string();
            if self.records.insert(label.clone(), record).is_none() {
                self.order.push(label);
            }
        }
        debug!("Store holds {} records", self.order.len());
    }

    /// Diagnostics of the last full parse
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Pending mutations
    pub fn ledger(&self) -> &DirtyLedger {
        &self.ledger
    }

    /// Whether unsaved mutations exist
    pub fn is_dirty(&self) -> bool {
        !self.ledger.is_empty()
    }

    /// Look up a record by label
    pub fn get(&self, label: &str) -> Option<&Record> {
        self.records.get(label)
    }

    /// Whether a record with `label` exists
    pub fn contains(&self, label: &str) -> bool {
        self.records.contains_key(label)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Labels in file order (new records last)
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Records in file order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|label| self.records.get(label))
    }

    /// Insert or overwrite records
    pub fn update(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            let label = record.label().to_string();
            if self.records.insert(label.clone(), record).is_none() {
                self.order.push(label.clone());
            }
            debug!("Updated entry '{}'", label);
            self.ledger.mark_updated(&label);
        }
    }

    /// Remove a record
    ///
    /// # Errors
    ///
    /// Returns [`ReftrailError::LabelNotFound`] if no record has `label`.
    pub fn pop(&mut self, label: &str) -> Result<Record> {
        let record = self
            .records
            .remove(label)
            .ok_or_else(|| ReftrailError::LabelNotFound(label.to_string()))?;
        self.order.retain(|l| l != label);
        debug!("Removed entry '{}'", label);
        self.ledger.mark_removed(label);
        Ok(record)
    }

    /// Rename a record
    ///
    /// The record keeps its position and its label mirror is updated. If the
    /// caller already moved the record to `new` (via [`RecordStore::update`]),
    /// only the rename is registered. Renaming a label to itself registers
    /// the record for rewriting without changing it.
    ///
    /// # Errors
    ///
    /// - [`ReftrailError::LabelNotFound`] if neither `old` nor `new` exists
    /// - [`ReftrailError::LabelCollision`] if both exist
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        debug!("Renaming entry '{}' to '{}'", old, new);
        if old == new {
            if !self.contains(old) {
                return Err(ReftrailError::LabelNotFound(old.to_string()));
            }
            self.ledger.mark_updated(old);
            return Ok(());
        }

        match (self.contains(old), self.contains(new)) {
            (true, true) => return Err(ReftrailError::LabelCollision(new.to_string())),
            (false, false) => return Err(ReftrailError::LabelNotFound(old.to_string())),
            (false, true) => {}
            (true, false) => {
                if let Some(mut record) = self.records.remove(old) {
                    record.set_label(new);
                    self.records.insert(new.to_string(), record);
                }
                if let Some(slot) = self.order.iter_mut().find(|l| *l == old) {
                    *slot = new.to_string();
                }
            }
        }
        self.ledger.mark_renamed(old, new);
        Ok(())
    }

    /// Set one field of a record, returning the previous value
    pub fn set_field(&mut self, label: &str, field: &str, value: FieldValue) -> Result<Option<FieldValue>> {
        let record = self
            .records
            .get_mut(label)
            .ok_or_else(|| ReftrailError::LabelNotFound(label.to_string()))?;
        let previous = record.set(field, value);
        self.ledger.mark_updated(label);
        Ok(previous)
    }

    /// Remove one field of a record, returning its value
    pub fn remove_field(&mut self, label: &str, field: &str) -> Result<Option<FieldValue>> {
        let record = self
            .records
            .get_mut(label)
            .ok_or_else(|| ReftrailError::LabelNotFound(label.to_string()))?;
        let previous = record.remove(field);
        if previous.is_some() {
            self.ledger.mark_updated(label);
        }
        Ok(previous)
    }

    /// Find a free label for `candidate`
    ///
    /// Returns `candidate` itself when it is free, when it is `record`'s own
    /// label, or when the stored record under it is identical to `record`.
    /// Otherwise suffixes are tried in enumeration order and the first free
    /// label is returned.
    pub fn disambiguate_label(&self, candidate: &str, record: Option<&Record>) -> String {
        let existing = match self.records.get(candidate) {
            None => {
                debug!("The label '{}' does not yet exist in the store", candidate);
                return candidate.to_string();
            }
            Some(existing) => existing,
        };
        if let Some(record) = record {
            if record.label() == candidate || existing == record {
                debug!("The label '{}' already belongs to this entry", candidate);
                return candidate.to_string();
            }
        }

        warn!("The label '{}' already exists. Running disambiguation.", candidate);
        let suffix = &self.config.label_suffix;
        let mut offset = 0;
        loop {
            offset += 1;
            let label = suffix.apply(candidate, offset);
            if !self.records.contains_key(&label) {
                info!("Found new unique label: {}", label);
                return label;
            }
            debug!("The label '{}' is taken as well", label);
        }
    }

    /// Labels related to `label` through the disambiguation suffix
    ///
    /// Returns the directly related labels (same raw label, any suffix) and
    /// the indirectly related ones (sharing the raw label as a prefix only).
    pub fn find_related_labels(&self, label: &str) -> (BTreeSet<String>, BTreeSet<String>) {
        let suffix = &self.config.label_suffix;
        let (trimmed, _) = suffix.trim_label(label);

        let mut direct = BTreeSet::new();
        let mut indirect = BTreeSet::new();
        for existing in self.labels().filter(|l| l.starts_with(trimmed)) {
            let (raw, _) = suffix.trim_label(existing);
            if raw == trimmed {
                direct.insert(existing.to_string());
            } else {
                indirect.insert(existing.to_string());
            }
        }
        (direct, indirect)
    }

    /// Write pending mutations to the record file
    ///
    /// The ledger is cleared only after the file was written successfully, so
    /// a failed save can simply be retried. The cache artifact is refreshed
    /// afterwards.
    #[instrument(skip(self), fields(pending = self.ledger.len()))]
    pub fn save(&mut self) -> Result<PatchSummary> {
        if self.ledger.is_empty() {
            debug!("No unsaved entries");
            return Ok(PatchSummary::default());
        }

        let persister = Persister::new(&self.config.file);
        let records = &self.records;
        let (summary, file) = persister.apply(&self.ledger, |label| records.get(label))?;
        self.ledger.clear();
        self.follow_file_order(&file.index());

        if let Some(cache) = &self.cache {
            let records: Vec<Record> = self.iter().cloned().collect();
            if let Err(e) = cache.store(&self.config.file, file.to_text().as_bytes(), &records) {
                warn!("Failed to refresh cache artifact: {}", e);
            }
        }
        Ok(summary)
    }

    /// Reorder the labels as their blocks appear in the saved file
    ///
    /// A save may append a record whose in-memory slot is elsewhere (a label
    /// renamed away and back, or a record re-added under a popped label).
    /// Afterwards iteration, the cache and a full parse agree.
    fn follow_file_order(&mut self, index: &BlockIndex) {
        let mut seen: HashSet<String> = HashSet::with_capacity(self.order.len());
        let mut order: Vec<String> = index
            .blocks()
            .iter()
            .filter(|b| self.records.contains_key(&b.label) && seen.insert(b.label.clone()))
            .map(|b| b.label.clone())
            .collect();
        order.extend(self.order.iter().filter(|l| !seen.contains(*l)).cloned());
        self.order = order;
    }

    /// Empty the store and forget pending mutations; the file is untouched
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.ledger.clear();
        self.diagnostics.clear();
    }
}
