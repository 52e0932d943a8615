//! Parse cache for record files
//!
//! Parsing a large record file is the dominant cost of every command. After a
//! full parse the store writes a cache artifact containing the normalized
//! records together with a [`CacheSignature`] of the file content they were
//! parsed from. A later read uses the artifact only if the signature still
//! matches; anything else (missing artifact, corrupted bytes, different
//! format version, edited file) falls back to a full parse.
//!
//! Artifacts are bincode-encoded and LZ4-compressed. They live in the cache
//! directory under a name derived from the record file's absolute path.

use crate::error::Result;
use crate::types::{FieldValue, Record};
use crate::utils::{atomic_write, flatten_path, hash_data};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Format version of the cache artifact
const CACHE_VERSION: u32 = 1;

/// Identity of the record file content a cache artifact was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSignature {
    /// SHA-256 of the file content (hex)
    pub content_hash: String,
    /// File length in bytes
    pub len: u64,
}

impl CacheSignature {
    /// Compute the signature of file content
    pub fn of(content: &[u8]) -> Self {
        Self {
            content_hash: hash_data(content),
            len: content.len() as u64,
        }
    }
}

// bincode cannot decode untagged enums, so the cache carries its own
// externally tagged mirror of `FieldValue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum CachedValue {
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl From<&FieldValue> for CachedValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(n) => CachedValue::Integer(*n),
            FieldValue::Float(x) => CachedValue::Float(*x),
            FieldValue::Text(s) => CachedValue::Text(s.clone()),
            FieldValue::List(items) => CachedValue::List(items.clone()),
        }
    }
}

impl From<CachedValue> for FieldValue {
    fn from(value: CachedValue) -> Self {
        match value {
            CachedValue::Integer(n) => FieldValue::Integer(n),
            CachedValue::Float(x) => FieldValue::Float(x),
            CachedValue::Text(s) => FieldValue::Text(s),
            CachedValue::List(items) => FieldValue::List(items),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedRecord {
    label: String,
    fields: Vec<(String, CachedValue)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheArtifact {
    version: u32,
    signature: CacheSignature,
    records: Vec<CachedRecord>,
}

/// Cache artifacts for record files, kept in one directory
#[derive(Debug, Clone)]
pub struct RecordCache {
    dir: PathBuf,
}

impl RecordCache {
    /// Create a cache rooted at `dir` (created lazily on first store)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the artifact for `file`
    pub fn artifact_path(&self, file: &Path) -> PathBuf {
        self.dir.join(format!("{}.cache", flatten_path(file)))
    }

    /// Load the cached records for `file` if they match `content`
    ///
    /// Never fails: every problem is logged and reported as a miss.
    pub fn load(&self, file: &Path, content: &[u8]) -> Option<Vec<Record>> {
        let path = self.artifact_path(file);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("No cache artifact at {:?}", path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read cache artifact {:?}: {}", path, e);
                return None;
            }
        };

        let artifact = match decode_artifact(&compressed) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Discarding corrupted cache artifact {:?}: {}", path, e);
                fs::remove_file(&path).ok();
                return None;
            }
        };

        if artifact.version != CACHE_VERSION {
            debug!("Cache artifact has version {}, expected {}", artifact.version, CACHE_VERSION);
            return None;
        }
        if artifact.signature != CacheSignature::of(content) {
            debug!("Cache artifact for {:?} is stale", file);
            return None;
        }

        let records = artifact
            .records
            .into_iter()
            .map(|cached| {
                let fields: BTreeMap<String, FieldValue> = cached
                    .fields
                    .into_iter()
                    .map(|(k, v)| (k, v.into()))
                    .collect();
                Record::new(cached.label, fields)
            })
            .collect::<Vec<_>>();
        debug!("Loaded {} records from cache", records.len());
        Some(records)
    }

    /// Write the artifact for `file`, built from `content` and its parse result
    pub fn store(&self, file: &Path, content: &[u8], records: &[Record]) -> Result<()> {
        let artifact = CacheArtifact {
            version: CACHE_VERSION,
            signature: CacheSignature::of(content),
            records: records
                .iter()
                .map(|record| CachedRecord {
                    label: record.label().to_string(),
                    fields: record
                        .disk_fields()
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v.into()))
                        .collect(),
                })
                .collect(),
        };

        let encoded = bincode::serde::encode_to_vec(&artifact, bincode::config::standard())?;
        let compressed = compress_prepend_size(&encoded);
        let path = self.artifact_path(file);
        atomic_write(&path, &compressed)?;

        debug!(
            "Cached {} records for {:?} ({} bytes)",
            records.len(),
            file,
            compressed.len()
        );
        Ok(())
    }
}

fn decode_artifact(compressed: &[u8]) -> Result<CacheArtifact> {
    let encoded = decompress_size_prepended(compressed)
        .map_err(|e| crate::error::ReftrailError::CacheCodec(e.to_string()))?;
    let (artifact, _) = bincode::serde::decode_from_slice(&encoded, bincode::config::standard())?;
    Ok(artifact)
}
