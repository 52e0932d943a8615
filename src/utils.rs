//! Utility functions for reftrail
//!
//! Small helpers shared by the record file, the cache and the CLI:
//!
//! - Content hashing (SHA-256, hex encoded)
//! - Atomic file replacement
//! - Flattening a path into a single file name
//! - Human-readable byte sizes

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path};
use tracing::trace;

/// Separator substituted for path separators when flattening a path
pub const PATH_ESCAPE: &str = "%2f";

/// Compute the SHA-256 hash of arbitrary data
///
/// Returns the hash as a 64-character hexadecimal string.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write `content` to `path`, replacing any previous file atomically
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the target, so readers never observe a half-written file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    if let Ok(metadata) = fs::metadata(path) {
        // keep the mode of the file being replaced
        temp.as_file().set_permissions(metadata.permissions())?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    trace!("Wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Flatten a path into a single file name
///
/// The path is made absolute (relative to the current directory) and its
/// components are joined with [`PATH_ESCAPE`], so distinct record files map
/// to distinct names inside one cache directory.
///
/// # Example
///
/// ```rust
/// use reftrail::utils::flatten_path;
/// use std::path::Path;
///
/// assert_eq!(flatten_path(Path::new("/home/me/lit.yaml")), "%2fhome%2fme%2flit.yaml");
/// ```
pub fn flatten_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut name = String::new();
    for component in absolute.components() {
        match component {
            Component::RootDir => {}
            Component::Prefix(p) => name.push_str(&p.as_os_str().to_string_lossy().replace(':', "")),
            Component::CurDir => continue,
            Component::ParentDir => {
                name.push_str(PATH_ESCAPE);
                name.push_str("..");
            }
            Component::Normal(part) => {
                name.push_str(PATH_ESCAPE);
                name.push_str(&part.to_string_lossy());
            }
        }
    }
    name
}

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
