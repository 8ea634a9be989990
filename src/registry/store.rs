//! Loading and saving the registry file.
//!
//! Encoding is canonical: keys are sorted recursively, the document is
//! pretty-printed with two-space indentation and ends in a newline. Equal
//! snapshots always encode to equal bytes, which is how the orchestrator
//! spots no-op updates.

use crate::error::{RegistryError, Result};
use crate::models::Registry;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Load the registry at `path`, or the default skeleton if it does not exist.
pub fn load(path: &Path) -> Result<Registry> {
    match std::fs::read_to_string(path) {
        Ok(content) => decode(path, &content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No registry at {}, using skeleton", path.display());
            Ok(Registry::default())
        }
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

/// Decode registry JSON; `path` is only used for error context.
pub fn decode(path: &Path, content: &str) -> Result<Registry> {
    serde_json::from_str(content).map_err(|source| RegistryError::Serialization {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode a snapshot to its canonical text form.
pub fn encode(registry: &Registry) -> Result<String> {
    // serde_json::Map is ordered by key, so a round trip through Value sorts
    // every object, including the flattened `extra` fields.
    let value: Value = serde_json::to_value(registry).map_err(RegistryError::Encoding)?;
    let mut text = serde_json::to_string_pretty(&value).map_err(RegistryError::Encoding)?;
    text.push('\n');
    Ok(text)
}

/// Write the snapshot to `path`, replacing the whole file at once.
///
/// The content lands in a temporary file beside the target which is then
/// renamed over it, so readers see either the old or the new document.
pub fn save(path: &Path, registry: &Registry) -> Result<()> {
    let text = encode(registry)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RegistryError::io(dir, e))?;
    tmp.write_all(text.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| RegistryError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| RegistryError::io(path, e.error))?;

    debug!("Wrote {} bytes to {}", text.len(), path.display());
    Ok(())
}
