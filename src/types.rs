//! Core data types used throughout the reftrail library
//!
//! This module contains fundamental data structures that are shared across
//! different components of the library.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Records**: `Record`, `FieldValue` - one bibliographic item and its fields
//! - **Labels**: `LabelSuffix`, `LabelSuffixConfig` - disambiguation of colliding labels
//! - **Configuration**: `StoreConfig` - where the record file lives and how it is tracked
//! - **Diagnostics**: `Diagnostic`, `Severity` - normalization findings from a full parse
//!
//! ## Examples
//!
//! ```rust
//! use reftrail::types::{FieldValue, Record};
//! use std::collections::BTreeMap;
//!
//! let mut fields = BTreeMap::new();
//! fields.insert("title".to_string(), FieldValue::from("On the Electrodynamics of Moving Bodies"));
//! fields.insert("year".to_string(), FieldValue::Integer(1905));
//!
//! let mut record = Record::new("einstein1905", fields);
//! assert_eq!(record.get(Record::MIRROR_FIELD), Some(&FieldValue::from("einstein1905")));
//!
//! record.set_label("Einstein1905");
//! assert_eq!(record.get(Record::MIRROR_FIELD), Some(&FieldValue::from("Einstein1905")));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// The value of a single record field
///
/// Record files store free-form fields; the store understands plain text,
/// lists of text (tags, files, urls) and numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer value (years, volumes, page counts)
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Plain text
    Text(String),
    /// List of text values
    List(Vec<String>),
}

impl FieldValue {
    /// Borrow the text content if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a command-line style value
    ///
    /// Integers become [`FieldValue::Integer`], comma separated values in
    /// square brackets become a list, everything else stays text.
    pub fn parse_cli(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return FieldValue::Integer(n);
        }
        if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let items = inner
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            return FieldValue::List(items);
        }
        FieldValue::Text(raw.to_string())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// A single bibliographic record: a label plus its field map
///
/// The field map always contains [`Record::MIRROR_FIELD`] holding the label,
/// for the benefit of converters that expect the key inside the data. The
/// mirror is maintained by [`Record::new`] and [`Record::set_label`] and is
/// never written to the record file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    label: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Name of the field mirroring the label
    pub const MIRROR_FIELD: &'static str = "ID";

    /// Create a record, installing the label mirror
    pub fn new(label: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        let label = label.into();
        let mut fields = fields;
        fields.insert(Self::MIRROR_FIELD.to_string(), FieldValue::Text(label.clone()));
        Self { label, fields }
    }

    /// The record's label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Change the label and its mirror field together
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.fields.insert(
            Self::MIRROR_FIELD.to_string(),
            FieldValue::Text(self.label.clone()),
        );
    }

    /// All fields, including the label mirror
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Fields as written to disk (the label mirror excluded)
    pub fn disk_fields(&self) -> BTreeMap<&str, &FieldValue> {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != Self::MIRROR_FIELD)
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }

    /// Look up one field
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Set one field, returning the previous value
    ///
    /// The label mirror cannot be set this way; use [`Record::set_label`].
    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        let field = field.into();
        if field == Self::MIRROR_FIELD {
            tracing::debug!(label = %self.label, "Ignoring direct write to the label mirror field");
            return None;
        }
        self.fields.insert(field, value)
    }

    /// Remove one field, returning its value
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        if field == Self::MIRROR_FIELD {
            return None;
        }
        self.fields.remove(field)
    }
}

/// Enumerators used to disambiguate colliding labels
///
/// # Examples
///
/// ```rust
/// use reftrail::types::LabelSuffix;
///
/// assert_eq!(LabelSuffix::Alpha.suffix(1), "a");
/// assert_eq!(LabelSuffix::Alpha.suffix(27), "aa");
/// assert_eq!(LabelSuffix::Capital.suffix(2), "B");
/// assert_eq!(LabelSuffix::Numeric.suffix(12), "12");
/// assert_eq!(LabelSuffix::Alpha.reverse("aa"), Some(27));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSuffix {
    /// a, b, ..., z, aa, ab, ...
    Alpha,
    /// A, B, ..., Z, AA, AB, ...
    Capital,
    /// 1, 2, 3, ...
    Numeric,
}

impl LabelSuffix {
    /// Render the `count`-th suffix (1-based)
    pub fn suffix(&self, count: usize) -> String {
        match self {
            LabelSuffix::Numeric => count.to_string(),
            LabelSuffix::Alpha => bijective_base26(count, b'a'),
            LabelSuffix::Capital => bijective_base26(count, b'A'),
        }
    }

    /// Recover the count from a rendered suffix
    pub fn reverse(&self, suffix: &str) -> Option<usize> {
        if suffix.is_empty() {
            return None;
        }
        match self {
            LabelSuffix::Numeric => suffix.parse::<usize>().ok().filter(|n| *n > 0),
            LabelSuffix::Alpha => reverse_base26(suffix, b'a'),
            LabelSuffix::Capital => reverse_base26(suffix, b'A'),
        }
    }
}

fn bijective_base26(mut count: usize, base: u8) -> String {
    let mut out = Vec::new();
    while count > 0 {
        count -= 1;
        out.push(base + (count % 26) as u8);
        count /= 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn reverse_base26(suffix: &str, base: u8) -> Option<usize> {
    let mut value: usize = 0;
    for byte in suffix.bytes() {
        if !(base..base + 26).contains(&byte) {
            return None;
        }
        value = value.checked_mul(26)?.checked_add((byte - base) as usize + 1)?;
    }
    Some(value)
}

/// Separator plus enumerator used for label disambiguation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSuffixConfig {
    /// String placed between the label and the suffix
    pub separator: String,
    /// Enumerator producing the suffix
    pub kind: LabelSuffix,
}

impl Default for LabelSuffixConfig {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
            kind: LabelSuffix::Alpha,
        }
    }
}

impl LabelSuffixConfig {
    /// Build the disambiguated label for `count`
    pub fn apply(&self, label: &str, count: usize) -> String {
        format!("{}{}{}", label, self.separator, self.kind.suffix(count))
    }

    /// Split a label into its raw part and its suffix count, if it has one
    pub fn trim_label<'a>(&self, label: &'a str) -> (&'a str, Option<usize>) {
        if self.separator.is_empty() {
            return (label, None);
        }
        match label.rsplit_once(self.separator.as_str()) {
            Some((raw, suffix)) if !raw.is_empty() => match self.kind.reverse(suffix) {
                Some(count) => (raw, Some(count)),
                None => (label, None),
            },
            _ => (label, None),
        }
    }
}

/// Configuration for a record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the record file
    pub file: PathBuf,
    /// Directory for cache artifacts (`None` disables caching)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Whether mutations are tracked with git
    #[serde(default)]
    pub git: bool,
    /// Label disambiguation format
    #[serde(default)]
    pub label_suffix: LabelSuffixConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            file: home.join(".local/share/reftrail/literature.yaml"),
            cache_dir: Some(home.join(".cache/reftrail/databases")),
            git: false,
            label_suffix: LabelSuffixConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Configuration for a record file with caching and git disabled
    pub fn for_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            cache_dir: None,
            git: false,
            label_suffix: LabelSuffixConfig::default(),
        }
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty JSON
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the configuration for values the store cannot work with
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.label_suffix.separator.is_empty() {
            return Err(crate::error::ReftrailError::InvalidConfiguration(
                "label_suffix.separator must not be empty".to_string(),
            ));
        }
        if self.file.as_os_str().is_empty() {
            return Err(crate::error::ReftrailError::InvalidConfiguration(
                "file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory containing the record file (the git work tree root)
    pub fn root(&self) -> PathBuf {
        match self.file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Severity of a normalization diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// A value was normalized; no action needed
    Info,
    /// A convention was violated; the user should look at the file
    Warning,
}

/// A finding produced while parsing the record file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the finding is
    pub severity: Severity,
    /// Label of the affected record, if any
    pub label: Option<String>,
    /// Affected field, if any
    pub field: Option<String>,
    /// Human readable description
    pub message: String,
}

impl Diagnostic {
    /// Emit this diagnostic through `tracing`
    pub fn emit(&self) {
        let label = self.label.as_deref().unwrap_or("-");
        let field = self.field.as_deref().unwrap_or("-");
        match self.severity {
            Severity::Info => tracing::info!(label, field, "{}", self.message),
            Severity::Warning => tracing::warn!(label, field, "{}", self.message),
        }
    }
}

/// Where a [`crate::RecordStore::read`] loaded its records from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// The cache artifact was current and used
    Cache,
    /// The record file was parsed in full
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mirror() {
        let mut record = Record::new("a", BTreeMap::new());
        assert_eq!(record.get("ID"), Some(&FieldValue::from("a")));
        assert!(record.disk_fields().is_empty());

        record.set_label("b");
        assert_eq!(record.label(), "b");
        assert_eq!(record.get("ID"), Some(&FieldValue::from("b")));

        // the mirror is not writable directly
        assert!(record.set("ID", FieldValue::from("c")).is_none());
        assert!(record.remove("ID").is_none());
        assert_eq!(record.get("ID"), Some(&FieldValue::from("b")));
    }

    #[test]
    fn test_label_suffix_enumerators() {
        assert_eq!(LabelSuffix::Alpha.suffix(1), "a");
        assert_eq!(LabelSuffix::Alpha.suffix(26), "z");
        assert_eq!(LabelSuffix::Alpha.suffix(27), "aa");
        assert_eq!(LabelSuffix::Alpha.suffix(52), "az");
        assert_eq!(LabelSuffix::Alpha.suffix(53), "ba");
        assert_eq!(LabelSuffix::Capital.suffix(3), "C");
        assert_eq!(LabelSuffix::Numeric.suffix(7), "7");

        for n in 1..2000 {
            assert_eq!(LabelSuffix::Alpha.reverse(&LabelSuffix::Alpha.suffix(n)), Some(n));
            assert_eq!(LabelSuffix::Capital.reverse(&LabelSuffix::Capital.suffix(n)), Some(n));
        }
        assert_eq!(LabelSuffix::Alpha.reverse("A"), None);
        assert_eq!(LabelSuffix::Numeric.reverse("0"), None);
        assert_eq!(LabelSuffix::Numeric.reverse(""), None);
    }

    #[test]
    fn test_trim_label() {
        let config = LabelSuffixConfig::default();
        assert_eq!(config.trim_label("knuth1984_b"), ("knuth1984", Some(2)));
        assert_eq!(config.trim_label("knuth1984"), ("knuth1984", None));
        assert_eq!(config.trim_label("knuth_1984"), ("knuth_1984", None));
        assert_eq!(config.trim_label("_a"), ("_a", None));
    }

    #[test]
    fn test_parse_cli_values() {
        assert_eq!(FieldValue::parse_cli("1905"), FieldValue::Integer(1905));
        assert_eq!(
            FieldValue::parse_cli("[physics, relativity]"),
            FieldValue::List(vec!["physics".into(), "relativity".into()])
        );
        assert_eq!(FieldValue::parse_cli("Annalen"), FieldValue::from("Annalen"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::for_file("/tmp/db.yaml");
        assert!(config.validate().is_ok());
        assert_eq!(config.root(), PathBuf::from("/tmp"));

        config.label_suffix.separator.clear();
        assert!(config.validate().is_err());
    }
}
