//! Line-indexed view of the on-disk record file
//!
//! The record file is a sequence of YAML documents, one per record, each
//! delimited by explicit start (`---`) and end (`...`) markers:
//!
//! ```text
//! ---
//! einstein1905:
//!   author: Albert Einstein
//!   title: Zur Elektrodynamik bewegter Körper
//!   year: 1905
//! ...
//! ---
//! knuth1984:
//!   ...
//! ```
//!
//! [`RecordFile`] keeps every line together with its original terminator so
//! that a file can be patched block by block and written back with all
//! untouched bytes preserved. [`BlockIndex`] locates blocks by label without
//! parsing any YAML.

use crate::error::{ReftrailError, Result};
use crate::types::{Diagnostic, FieldValue, Record, Severity};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, trace};

/// Start-of-document marker
pub const BLOCK_START: &str = "---";
/// End-of-document marker
pub const BLOCK_END: &str = "...";

/// Location of one record block inside the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Label found on the block's key line
    pub label: String,
    /// Line range covered by the block, end-marker included
    pub lines: Range<usize>,
    /// Whether the block was closed by an explicit end marker
    pub terminated: bool,
}

/// Index of all labeled blocks in a record file
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    blocks: Vec<Block>,
    by_label: HashMap<String, usize>,
    unlabeled: Vec<Range<usize>>,
}

impl BlockIndex {
    /// Build the index for a sequence of lines
    pub fn build(lines: &[String]) -> Self {
        let mut index = BlockIndex::default();
        let mut open: Option<(usize, Option<String>)> = None;

        for (i, line) in lines.iter().enumerate() {
            let content = strip_terminator(line);
            if is_start_marker(content) {
                if let Some((start, label)) = open.take() {
                    index.close(start, i, label, false);
                }
                open = Some((i, None));
            } else if is_end_marker(content) {
                if let Some((start, label)) = open.take() {
                    index.close(start, i + 1, label, true);
                } else {
                    trace!("Stray end marker on line {}", i + 1);
                }
            } else if let Some((_, label)) = open.as_mut() {
                if label.is_none() {
                    *label = label_from_key_line(content);
                }
            }
        }
        if let Some((start, label)) = open {
            index.close(start, lines.len(), label, false);
        }

        index
    }

    fn close(&mut self, start: usize, end: usize, label: Option<String>, terminated: bool) {
        match label {
            Some(label) => {
                // a later duplicate shadows the earlier block
                self.by_label.insert(label.clone(), self.blocks.len());
                self.blocks.push(Block {
                    label,
                    lines: start..end,
                    terminated,
                });
            }
            None => self.unlabeled.push(start..end),
        }
    }

    /// Block currently holding `label`
    pub fn get(&self, label: &str) -> Option<&Block> {
        self.by_label.get(label).map(|&i| &self.blocks[i])
    }

    /// All labeled blocks in file order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Ranges of documents without a recognizable label line
    pub fn unlabeled(&self) -> &[Range<usize>] {
        &self.unlabeled
    }

    /// Number of labeled blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no labeled block exists
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// The record file as an ordered list of lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFile {
    lines: Vec<String>,
}

impl RecordFile {
    /// Split text into lines, keeping each line's terminator
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split_inclusive('\n').map(str::to_string).collect(),
        }
    }

    /// Read the record file from disk
    ///
    /// # Errors
    ///
    /// Returns [`ReftrailError::DatabaseMissing`] if the file does not exist.
    pub fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::from_text(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ReftrailError::DatabaseMissing(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the file back, replacing the previous content atomically
    pub fn write(&self, path: &Path) -> Result<()> {
        crate::utils::atomic_write(path, self.to_text().as_bytes())
    }

    /// Lines with their terminators
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Replace the content with new lines
    pub fn set_lines(&mut self, lines: Vec<String>) {
        self.lines = lines;
    }

    /// Concatenate all lines back into text
    pub fn to_text(&self) -> String {
        self.lines.concat()
    }

    /// Build the block index of the current content
    pub fn index(&self) -> BlockIndex {
        BlockIndex::build(&self.lines)
    }

    /// Parse every block into records, normalizing values on the way
    ///
    /// Records are returned in file order. Normalization findings are
    /// returned as diagnostics rather than logged, so callers decide when
    /// they are surfaced.
    pub fn parse(&self) -> Result<(Vec<Record>, Vec<Diagnostic>)> {
        let index = self.index();
        let mut diagnostics = Vec::new();
        let mut order: Vec<String> = Vec::with_capacity(index.len());
        let mut records: HashMap<String, Record> = HashMap::with_capacity(index.len());

        for range in index.unlabeled() {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                label: None,
                field: None,
                message: format!(
                    "Document starting on line {} has no label and is ignored",
                    range.start + 1
                ),
            });
        }

        for block in index.blocks() {
            let record = self.parse_block(block, &mut diagnostics)?;
            if records.contains_key(record.label()) {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    label: Some(record.label().to_string()),
                    field: None,
                    message: format!(
                        "An entry with label '{}' was already encountered earlier in the file; \
                         the later one takes effect. Please check the file manually.",
                        record.label()
                    ),
                });
            } else {
                order.push(record.label().to_string());
            }
            records.insert(record.label().to_string(), record);
        }

        let parsed = order
            .into_iter()
            .filter_map(|label| records.remove(&label))
            .collect::<Vec<_>>();
        debug!("Parsed {} records", parsed.len());
        Ok((parsed, diagnostics))
    }

    fn parse_block(&self, block: &Block, diagnostics: &mut Vec<Diagnostic>) -> Result<Record> {
        let body_end = if block.terminated {
            block.lines.end - 1
        } else {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                label: Some(block.label.clone()),
                field: None,
                message: format!("Entry '{}' is missing its end marker", block.label),
            });
            block.lines.end
        };
        let body: String = self.lines[block.lines.start + 1..body_end].concat();

        let document: Value = serde_yaml::from_str(&body).map_err(|e| {
            ReftrailError::malformed(block.lines.start, format!("entry '{}': {}", block.label, e))
        })?;
        let mapping = match document {
            Value::Mapping(m) => m,
            _ => {
                return Err(ReftrailError::malformed(
                    block.lines.start,
                    format!("entry '{}' is not a mapping", block.label),
                ))
            }
        };

        let mut data = None;
        for (key, value) in mapping {
            let key = scalar_to_string(&key).ok_or_else(|| {
                ReftrailError::malformed(block.lines.start, "entry key is not a scalar")
            })?;
            if key == block.label && data.is_none() {
                data = Some(value);
            } else {
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    label: Some(block.label.clone()),
                    field: None,
                    message: format!(
                        "Additional key '{}' in the document of entry '{}' is ignored",
                        key, block.label
                    ),
                });
            }
        }

        let mut fields = BTreeMap::new();
        match data {
            Some(Value::Mapping(m)) => {
                for (key, value) in m {
                    let field = scalar_to_string(&key).ok_or_else(|| {
                        ReftrailError::malformed(block.lines.start, "field name is not a scalar")
                    })?;
                    if let Some(value) = normalize_value(&block.label, &field, value, diagnostics) {
                        fields.insert(field, value);
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(ReftrailError::malformed(
                    block.lines.start,
                    format!("entry '{}' does not contain a field mapping", block.label),
                ))
            }
        }

        if fields.remove(Record::MIRROR_FIELD).is_some() {
            diagnostics.push(Diagnostic {
                severity: Severity::Info,
                label: Some(block.label.clone()),
                field: Some(Record::MIRROR_FIELD.to_string()),
                message: format!(
                    "The field '{}' of entry '{}' is no longer required. It will be inferred from the entry label.",
                    Record::MIRROR_FIELD,
                    block.label
                ),
            });
        }

        Ok(Record::new(block.label.clone(), fields))
    }
}

/// Serialize a record into a complete block, start and end markers included
///
/// Labels whose emitted key line would not be found again by the block
/// index (multi-line, folded or overlong keys) are written as an explicit
/// `? "label"` key followed by the field mapping.
pub fn serialize_record(record: &Record) -> Result<String> {
    let mut document = BTreeMap::new();
    document.insert(record.label(), record.disk_fields());
    let mut body = serde_yaml::to_string(&document)?;

    let key_line = body.lines().next().unwrap_or_default();
    let implicit_too_long = !key_line.starts_with("? ") && key_line.len() > MAX_IMPLICIT_KEY;
    if implicit_too_long || label_from_key_line(key_line).as_deref() != Some(record.label()) {
        debug!("Writing entry '{}' with an explicit key", record.label());
        body = explicit_key_body(record)?;
    }

    let mut block = String::with_capacity(body.len() + 8);
    block.push_str(BLOCK_START);
    block.push('\n');
    block.push_str(&body);
    if !body.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(BLOCK_END);
    block.push('\n');
    Ok(block)
}

/// Longest key line YAML parsers accept as an implicit key
const MAX_IMPLICIT_KEY: usize = 1024;

fn explicit_key_body(record: &Record) -> Result<String> {
    // a JSON string is a single-line YAML double-quoted scalar
    let key = serde_json::to_string(record.label())?;
    let fields = serde_yaml::to_string(&record.disk_fields())?;

    let mut body = format!("? {}\n:", key);
    if fields.trim_end() == "{}" {
        body.push_str(" {}\n");
        return Ok(body);
    }
    body.push('\n');
    for line in fields.lines() {
        if !line.is_empty() {
            body.push_str("  ");
            body.push_str(line);
        }
        body.push('\n');
    }
    Ok(body)
}

fn normalize_value(
    label: &str,
    field: &str,
    value: Value,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<FieldValue> {
    let mut note = |severity: Severity, message: String| {
        diagnostics.push(Diagnostic {
            severity,
            label: Some(label.to_string()),
            field: Some(field.to_string()),
            message,
        })
    };

    match value {
        Value::String(s) => {
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(n) = s.parse::<i64>() {
                    note(
                        Severity::Info,
                        format!("Converting field '{}' of entry '{}' to integer: {}.", field, label, s),
                    );
                    return Some(FieldValue::Integer(n));
                }
            }
            Some(FieldValue::Text(s))
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(FieldValue::Integer(i)),
            None => n.as_f64().map(FieldValue::Float),
        },
        Value::Bool(b) => {
            note(
                Severity::Info,
                format!("Converting boolean field '{}' of entry '{}' to text.", field, label),
            );
            Some(FieldValue::Text(b.to_string()))
        }
        Value::Sequence(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match scalar_to_string(&item) {
                    Some(s) => list.push(s),
                    None => note(
                        Severity::Warning,
                        format!("Dropping a non-scalar list item of field '{}' in entry '{}'.", field, label),
                    ),
                }
            }
            Some(FieldValue::List(list))
        }
        Value::Null => {
            note(
                Severity::Info,
                format!("Dropping empty field '{}' of entry '{}'.", field, label),
            );
            None
        }
        other => {
            note(
                Severity::Warning,
                format!(
                    "Field '{}' of entry '{}' has an unsupported structure and is kept as text.",
                    field, label
                ),
            );
            serde_yaml::to_string(&other)
                .ok()
                .map(|s| FieldValue::Text(s.trim_end().to_string()))
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn is_start_marker(content: &str) -> bool {
    content == BLOCK_START || content.starts_with("--- ")
}

fn is_end_marker(content: &str) -> bool {
    content.trim_end() == BLOCK_END
}

/// Extract the label from a block's key line
///
/// Key lines are the only unindented lines inside a block. They look like
/// `label:` (or `label: {}` for a record without fields), or `? label` for
/// an explicit key. The key itself is resolved by the YAML parser, so
/// quoted and unusual plain scalars such as `-x` are handled alike.
fn label_from_key_line(content: &str) -> Option<String> {
    if content.is_empty() || content.starts_with([' ', '\t', '#']) {
        return None;
    }
    let trimmed = content.trim_end();
    // sequence items
    if trimmed == "-" || trimmed.starts_with("- ") || trimmed.starts_with("-\t") {
        return None;
    }
    if let Some(key) = trimmed.strip_prefix("? ") {
        let key: Value = serde_yaml::from_str(key).ok()?;
        return scalar_to_string(&key);
    }

    let mapping = match serde_yaml::from_str::<Value>(trimmed).ok()? {
        Value::Mapping(m) => m,
        _ => return None,
    };
    if mapping.len() != 1 {
        return None;
    }
    let (key, value) = mapping.into_iter().next()?;
    match value {
        Value::Null => {}
        Value::Mapping(m) if m.is_empty() => {}
        _ => return None,
    }
    scalar_to_string(&key)
}
