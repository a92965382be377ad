//! Provenance marker for archived trees.
//!
//! Written as `<top name>.dv.info` next to the archived top directory and
//! records where the data came from.

use crate::fs::QualifiedPath;
use crate::utils::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MARKER_EXTENSION: &str = ".dv.info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceMarker {
    /// Absolute path of the source top directory
    pub source: String,
}

pub fn marker_path(backup_root: &QualifiedPath, top_name: &str) -> PathBuf {
    backup_root.join_file(&format!("{top_name}{MARKER_EXTENSION}"))
}

/// Write (or overwrite) the marker, creating `backup_root` if needed.
pub fn write_marker(
    backup_root: &QualifiedPath,
    top_name: &str,
    source: &QualifiedPath,
) -> Result<PathBuf> {
    std::fs::create_dir_all(backup_root.as_path())
        .map_err(|e| EngineError::fs(backup_root.as_path(), e))?;

    let marker = ProvenanceMarker {
        source: source.to_string(),
    };
    let path = marker_path(backup_root, top_name);
    std::fs::write(&path, serde_json::to_vec(&marker)?).map_err(|e| EngineError::fs(&path, e))?;
    Ok(path)
}
