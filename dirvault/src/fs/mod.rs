//! File system helpers: qualified paths, link detection and file metadata.

pub mod link;
pub mod metadata;
pub mod qualified_path;
pub mod walker;

pub use metadata::FileStat;
pub use qualified_path::{QualifiedPath, SEPARATOR};

use crate::utils::{EngineError, Result};

/// Fail unless `dir` is missing or empty.
pub fn ensure_empty_destination(dir: &QualifiedPath) -> Result<()> {
    let path = dir.as_path();
    match std::fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(EngineError::DestinationNotEmpty(dir.to_string()));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::fs(path, e)),
    }
}
