//! One-level directory listing.
//!
//! The analyzer recurses itself (ignore rules are inherited per level), so
//! this module only splits the immediate children of one directory into
//! files and subdirectories, in file-name order.

use crate::utils::{EngineError, Result};
use std::path::Path;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Immediate children of a directory
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Children {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
}

/// Classify an entry. Symlinks resolve to their target; broken links are
/// skipped.
fn classify(entry: &DirEntry) -> Option<EntryKind> {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        return Some(EntryKind::Dir);
    }
    if file_type.is_file() {
        return Some(EntryKind::File);
    }
    if file_type.is_symlink() {
        return match std::fs::metadata(entry.path()) {
            // Directory links are recorded as link nodes by the analyzer
            Ok(resolved) if resolved.is_dir() => Some(EntryKind::Dir),
            Ok(resolved) if resolved.is_file() => Some(EntryKind::File),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping broken symlink");
                None
            }
        };
    }
    None
}

/// List the files and subdirectories directly inside `dir`
pub fn list_children(dir: &Path) -> Result<Children> {
    let mut children = Children::default();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            EngineError::fs(path, e.into())
        })?;

        let Some(kind) = classify(&entry) else {
            continue;
        };

        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => {
                warn!(path = %entry.path().display(), "Skipping entry with non UTF-8 name");
                continue;
            }
        };

        match kind {
            EntryKind::File => children.files.push(name),
            EntryKind::Dir => children.dirs.push(name),
        }
    }

    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let children = list_children(temp_dir.path())?;
        assert_eq!(children, Children::default());
        Ok(())
    }

    #[test]
    fn test_list_is_one_level_and_sorted() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::create_dir(temp_dir.path().join("another"))?;
        fs::write(temp_dir.path().join("file2.txt"), b"content2")?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/nested.txt"), b"nested")?;

        let children = list_children(temp_dir.path())?;
        assert_eq!(children.files, vec!["file1.txt", "file2.txt"]);
        assert_eq!(children.dirs, vec!["another", "subdir"]);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_resolve_and_broken_ones_are_skipped() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir(root.join("real"))?;
        fs::write(root.join("data.txt"), b"data")?;
        std::os::unix::fs::symlink(root.join("real"), root.join("dir-link"))?;
        std::os::unix::fs::symlink(root.join("data.txt"), root.join("file-link"))?;
        std::os::unix::fs::symlink(root.join("gone"), root.join("broken"))?;

        let children = list_children(root)?;
        assert_eq!(children.files, vec!["data.txt", "file-link"]);
        assert_eq!(children.dirs, vec!["dir-link", "real"]);

        Ok(())
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_children(&temp_dir.path().join("nope")).is_err());
    }
}
