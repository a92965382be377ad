//! Link detection for directories.
//!
//! Symlinks, junctions and mount points are recorded in the tree but never
//! recursed into.

use crate::utils::{EngineError, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Regular,
    Link,
}

/// Classify a directory. With `check_mount` set, a directory living on a
/// different device than its parent counts as a link.
pub fn link_status(path: &Path, check_mount: bool) -> Result<LinkStatus> {
    let metadata = fs::symlink_metadata(path).map_err(|e| EngineError::fs(path, e))?;

    // std reports both symlinks and junctions as symlinks on Windows.
    if metadata.file_type().is_symlink() {
        return Ok(LinkStatus::Link);
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
        if metadata.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            return Err(EngineError::UnsupportedReparsePoint(path.to_path_buf()));
        }
    }

    #[cfg(unix)]
    if check_mount {
        use std::os::unix::fs::MetadataExt;
        if let Some(parent) = path.parent() {
            if let Ok(parent_meta) = fs::metadata(parent) {
                if parent_meta.dev() != metadata.dev() {
                    return Ok(LinkStatus::Link);
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = check_mount;

    Ok(LinkStatus::Regular)
}
