//! Bulk modification of one field across many records
//!
//! A [`Modification`] is written as `<field>:<value>` and applied to a list
//! of labels. The value may reference the record's own data through
//! `{label}` and `{<field>}` placeholders, e.g. `label:{author}{year}`.
//!
//! ## Modes
//!
//! | mode     | text              | list          | integer           |
//! |----------|-------------------|---------------|-------------------|
//! | `Set`    | overwrite         | overwrite     | overwrite         |
//! | `Add`    | append            | push item     | add (numeric)     |
//! | `Remove` | (unchanged)       | drop item     | subtract (numeric)|
//!
//! An empty value with `Remove` deletes the field. Modifying the `label`
//! field renames the record in place, disambiguating against existing labels.

use crate::error::{ReftrailError, Result};
use crate::store::RecordStore;
use crate::types::{FieldValue, Record};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Pseudo-field addressing the record label
pub const LABEL_FIELD: &str = "label";

/// How the new value is combined with the previous one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyMode {
    /// Overwrite the field
    #[default]
    Set,
    /// Add to the field
    Add,
    /// Remove from the field
    Remove,
}

/// One field change applied to many records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Field to change
    pub field: String,
    /// Value template
    pub value: String,
    /// Combination mode
    pub mode: ModifyMode,
}

/// The effect of a modification on one record
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyChange {
    /// Label before the modification
    pub label: String,
    /// Label after the modification (differs only for label changes)
    pub new_label: String,
    /// Previous value, `None` if the field was absent
    pub previous: Option<FieldValue>,
    /// New value, `None` if the field was removed
    pub value: Option<FieldValue>,
}

impl Modification {
    /// Parse `<field>:<value>`, splitting at the first colon only
    pub fn parse(raw: &str, mode: ModifyMode) -> Result<Self> {
        let (field, value) = raw
            .split_once(':')
            .ok_or_else(|| ReftrailError::InvalidModification(format!("expected field:value, got '{}'", raw)))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(ReftrailError::InvalidModification(format!("missing field name in '{}'", raw)));
        }
        Ok(Self {
            field: field.to_string(),
            value: value.to_string(),
            mode,
        })
    }

    /// Substitute `{label}` and `{<field>}` placeholders for `record`
    ///
    /// Placeholders naming an absent field are kept verbatim.
    pub fn render(&self, record: &Record) -> String {
        let mut out = String::with_capacity(self.value.len());
        let mut rest = self.value.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let Some(close) = tail.find('}') else {
                out.push_str(tail);
                return out;
            };
            let name = &tail[1..close];
            if name == LABEL_FIELD {
                out.push_str(record.label());
            } else if let Some(value) = record.get(name) {
                out.push_str(&value.to_string());
            } else {
                out.push_str(&tail[..=close]);
            }
            rest = &tail[close + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Apply the modification to every record in `labels`
    ///
    /// Unknown labels are skipped with a warning, as are records whose value
    /// would not change. With `dry_run` the store is left untouched and the
    /// changes that would be made are returned.
    ///
    /// # Errors
    ///
    /// [`ReftrailError::InvalidModification`] if a label would become empty.
    /// Records processed before the failing one stay modified in memory.
    #[instrument(skip(self, store), fields(field = %self.field, mode = ?self.mode))]
    pub fn apply(&self, store: &mut RecordStore, labels: &[String], dry_run: bool) -> Result<Vec<ModifyChange>> {
        let mut changes = Vec::new();
        for label in labels {
            let Some(record) = store.get(label) else {
                warn!("No entry with the label '{}' could be found.", label);
                continue;
            };
            let Some(change) = self.plan(store, record)? else {
                continue;
            };
            if dry_run {
                info!("{}: changing field '{}' from {:?} to {:?}", label, self.field, change.previous, change.value);
            } else {
                self.commit(store, &change)?;
                info!("'{}' was modified.", label);
            }
            changes.push(change);
        }
        Ok(changes)
    }

    fn plan(&self, store: &RecordStore, record: &Record) -> Result<Option<ModifyChange>> {
        let label = record.label();
        let local = self.render(record);
        let is_label = self.field == LABEL_FIELD;

        if local.is_empty() {
            if is_label {
                return Err(ReftrailError::InvalidModification(
                    "the label field may not be empty and cannot be removed".to_string(),
                ));
            }
            if self.mode != ModifyMode::Remove {
                warn!(
                    "Empty modification value without remove mode: the field '{}' is overwritten, not deleted.",
                    self.field
                );
            }
        }

        let previous = if is_label {
            Some(FieldValue::from(label))
        } else {
            record.get(&self.field).cloned()
        };

        let mut value = match self.mode {
            ModifyMode::Set => Some(numeric_or_text(&local)),
            ModifyMode::Add => Some(self.add(label, previous.as_ref(), &local)),
            ModifyMode::Remove => self.remove(label, previous.as_ref(), &local),
        };

        let mut new_label = label.to_string();
        if is_label {
            let candidate = value.as_ref().map(|v| v.to_string()).unwrap_or_default();
            new_label = store.disambiguate_label(&candidate, Some(record));
            value = Some(FieldValue::from(new_label.clone()));
        }

        if value == previous {
            info!("New and previous values match. Skipping modification of entry '{}'.", label);
            return Ok(None);
        }
        Ok(Some(ModifyChange {
            label: label.to_string(),
            new_label,
            previous,
            value,
        }))
    }

    fn add(&self, label: &str, previous: Option<&FieldValue>, local: &str) -> FieldValue {
        match (previous, numeric(local)) {
            (None, _) => FieldValue::from(local),
            (Some(FieldValue::Text(s)), _) => FieldValue::Text(format!("{}{}", s, local)),
            (Some(FieldValue::List(items)), _) => {
                let mut items = items.clone();
                items.push(local.to_string());
                FieldValue::List(items)
            }
            (Some(FieldValue::Integer(n)), Some(m)) => FieldValue::Integer(n.saturating_add(m)),
            (Some(other), _) => {
                let joined = format!("{}{}", other, local);
                warn!(
                    "Encountered an unexpected field type to add to. Converting the field '{}' of entry '{}' to a simple string: '{}'.",
                    self.field, label, joined
                );
                FieldValue::Text(joined)
            }
        }
    }

    fn remove(&self, label: &str, previous: Option<&FieldValue>, local: &str) -> Option<FieldValue> {
        if local.is_empty() {
            debug!("Empty value in remove mode; removing the entire field");
            return None;
        }
        match (previous, numeric(local)) {
            (Some(FieldValue::List(items)), _) => {
                let mut items = items.clone();
                match items.iter().position(|item| item == local) {
                    Some(i) => {
                        items.remove(i);
                    }
                    None => warn!("Could not remove '{}' from the field '{}' of entry '{}'.", local, self.field, label),
                }
                Some(FieldValue::List(items))
            }
            (Some(FieldValue::Integer(n)), Some(m)) => Some(FieldValue::Integer(n.saturating_sub(m))),
            (previous, _) => {
                warn!(
                    "Encountered an unexpected field type to remove from. Leaving the field '{}' of entry '{}' unchanged.",
                    self.field, label
                );
                previous.cloned()
            }
        }
    }

    fn commit(&self, store: &mut RecordStore, change: &ModifyChange) -> Result<()> {
        if change.new_label != change.label {
            let mut record = store
                .get(&change.label)
                .cloned()
                .ok_or_else(|| ReftrailError::LabelNotFound(change.label.clone()))?;
            record.set_label(change.new_label.clone());
            store.update([record]);
            store.pop(&change.label)?;
            return store.rename(&change.label, &change.new_label);
        }
        match &change.value {
            Some(value) => {
                store.set_field(&change.label, &self.field, value.clone())?;
            }
            None => {
                store.remove_field(&change.label, &self.field)?;
            }
        }
        Ok(())
    }
}

fn numeric(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn numeric_or_text(raw: &str) -> FieldValue {
    numeric(raw).map_or_else(|| FieldValue::from(raw), FieldValue::Integer)
}
