//! Minimal-diff persistence of pending mutations
//!
//! The [`Persister`] turns a [`DirtyLedger`] into in-place edits of the
//! record file. It works on the line-indexed view provided by
//! [`RecordFile`] and never reparses or reformats blocks it was not asked to
//! touch:
//!
//! | block for old label | target    | edit                                   |
//! |---------------------|-----------|----------------------------------------|
//! | missing             | removed   | nothing (created and deleted unsaved)  |
//! | missing             | label     | append the serialized record           |
//! | present             | removed   | drop the block's line range            |
//! | present             | label     | replace the block's line range in place|
//!
//! Any block not named in the ledger is byte-identical before and after a
//! patch. Applying the same ledger to an already patched file is a no-op in
//! effect: a block that was renamed by an earlier, interrupted save is found
//! under its new label and refreshed instead of appended a second time.

use crate::error::Result;
use crate::ledger::DirtyLedger;
use crate::record_file::{serialize_record, Block, BlockIndex, RecordFile};
use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Counts of the edits performed by one patch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    /// Blocks appended at the end of the file
    pub appended: usize,
    /// Blocks replaced in place
    pub replaced: usize,
    /// Blocks removed
    pub removed: usize,
    /// Ledger entries that required no edit
    pub skipped: usize,
}

impl PatchSummary {
    /// Whether the pass changed the file at all
    pub fn has_changes(&self) -> bool {
        self.appended > 0 || self.replaced > 0 || self.removed > 0
    }
}

enum Edit {
    Replace(String),
    Remove,
}

/// Applies a ledger to a record file
#[derive(Debug, Clone)]
pub struct Persister {
    path: PathBuf,
}

impl Persister {
    /// Create a persister for the record file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record file, patch it and write it back
    ///
    /// `lookup` resolves a label to the current in-memory record. The file is
    /// only rewritten if at least one block changed. The returned file holds
    /// the content now on disk.
    pub fn apply<'r, F>(&self, ledger: &DirtyLedger, lookup: F) -> Result<(PatchSummary, RecordFile)>
    where
        F: Fn(&str) -> Option<&'r Record>,
    {
        let mut file = RecordFile::read(&self.path)?;
        let summary = Self::patch(&mut file, ledger, lookup)?;
        if summary.has_changes() {
            file.write(&self.path)?;
            info!(
                "Saved {:?}: {} appended, {} replaced, {} removed",
                self.path, summary.appended, summary.replaced, summary.removed
            );
        } else {
            debug!("Nothing to write for {:?}", self.path);
        }
        Ok((summary, file))
    }

    /// Patch a record file in memory according to `ledger`
    pub fn patch<'r, F>(file: &mut RecordFile, ledger: &DirtyLedger, lookup: F) -> Result<PatchSummary>
    where
        F: Fn(&str) -> Option<&'r Record>,
    {
        let index = file.index();
        let block_ends: HashMap<usize, usize> = index
            .blocks()
            .iter()
            .map(|b| (b.lines.start, b.lines.end))
            .collect();

        // blocks about to be renamed, by their new label
        let rename_sources: HashMap<&str, &Block> = ledger
            .iter()
            .filter_map(|(old, target)| {
                let new = target.label().filter(|new| *new != old)?;
                index.get(old).map(|block| (new, block))
            })
            .collect();

        let mut summary = PatchSummary::default();
        let mut edits: HashMap<usize, Edit> = HashMap::new();
        let mut appended: Vec<String> = Vec::new();
        let mut written: HashSet<String> = HashSet::new();

        for (old, target) in ledger.iter() {
            let block = index
                .get(old)
                .or_else(|| target.label().and_then(|new| index.get(new)))
                .or_else(|| {
                    target
                        .label()
                        .filter(|new| *new == old)
                        .and_then(|new| rename_sources.get(new).copied())
                });

            match (block, target.label()) {
                (None, None) => {
                    trace!("Entry '{}' was never saved; nothing to delete", old);
                    summary.skipped += 1;
                }
                (None, Some(new)) => {
                    if written.contains(new) {
                        summary.skipped += 1;
                        continue;
                    }
                    match lookup(new) {
                        Some(record) => {
                            debug!("Adding new entry '{}'", new);
                            appended.push(serialize_record(record)?);
                            written.insert(new.to_string());
                            summary.appended += 1;
                        }
                        None => {
                            trace!("Entry '{}' is no longer in memory; skipping", new);
                            summary.skipped += 1;
                        }
                    }
                }
                (Some(block), target) => {
                    let start = block.lines.start;
                    let record = target
                        .filter(|new| !written.contains(*new))
                        .and_then(|new| lookup(new).map(|r| (new, r)));
                    if edits.contains_key(&start) {
                        // block already claimed by an earlier entry
                        match record {
                            Some((new, record)) => {
                                debug!("Adding entry '{}' reusing label '{}'", new, old);
                                appended.push(serialize_record(record)?);
                                written.insert(new.to_string());
                                summary.appended += 1;
                            }
                            None => summary.skipped += 1,
                        }
                        continue;
                    }
                    match record {
                        Some((new, record)) => {
                            debug!("Writing modified entry '{}' over block '{}'", new, block.label);
                            edits.insert(start, Edit::Replace(serialize_record(record)?));
                            written.insert(new.to_string());
                            summary.replaced += 1;
                            if new != block.label {
                                summary.removed += remove_shadowed(&index, block, &mut edits);
                            }
                        }
                        None => {
                            debug!("Deleting entry '{}'", block.label);
                            edits.insert(start, Edit::Remove);
                            summary.removed += 1 + remove_shadowed(&index, block, &mut edits);
                        }
                    }
                }
            }
        }

        if edits.is_empty() && appended.is_empty() {
            return Ok(summary);
        }

        let lines = file.lines();
        let mut out: Vec<String> = Vec::with_capacity(lines.len() + appended.len() * 8);
        let mut i = 0;
        while i < lines.len() {
            match edits.remove(&i) {
                Some(edit) => {
                    if let Edit::Replace(text) = edit {
                        out.extend(text.split_inclusive('\n').map(str::to_string));
                    }
                    i = block_ends.get(&i).copied().unwrap_or(i + 1);
                }
                None => {
                    out.push(lines[i].clone());
                    i += 1;
                }
            }
        }

        if !appended.is_empty() {
            if let Some(last) = out.last_mut() {
                if !last.ends_with('\n') {
                    last.push('\n');
                }
            }
            for text in appended {
                out.extend(text.split_inclusive('\n').map(str::to_string));
            }
        }

        file.set_lines(out);
        Ok(summary)
    }
}

/// Drop earlier blocks carrying the same label as `block`
///
/// A duplicated label is only visible through its last block; once that one
/// is removed or renamed, the earlier copies must not resurface.
fn remove_shadowed(index: &BlockIndex, block: &Block, edits: &mut HashMap<usize, Edit>) -> usize {
    let mut removed = 0;
    for shadowed in index
        .blocks()
        .iter()
        .filter(|b| b.label == block.label && b.lines.start != block.lines.start)
    {
        if !edits.contains_key(&shadowed.lines.start) {
            debug!("Deleting shadowed copy of '{}' on line {}", block.label, shadowed.lines.start + 1);
            edits.insert(shadowed.lines.start, Edit::Remove);
            removed += 1;
        }
    }
    removed
}
