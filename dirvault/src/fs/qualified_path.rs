//! Directory paths that always end with the platform separator.
//!
//! Relative and absolute paths throughout the engine are plain strings built
//! by concatenation (`parent + name + SEPARATOR`), which is also what ignore
//! rules match against.

use crate::utils::{EngineError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

pub const SEPARATOR: char = std::path::MAIN_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedPath(String);

impl QualifiedPath {
    pub fn new(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with(SEPARATOR) {
            path.push(SEPARATOR);
        }
        Self(path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.to_str()
            .map(Self::new)
            .ok_or_else(|| EngineError::NonUtf8Path(path.to_path_buf()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path without the trailing separator. The filesystem root stays as is.
    pub fn trimmed(&self) -> &str {
        let trimmed = self.0.trim_end_matches(SEPARATOR);
        if trimmed.is_empty() {
            &self.0[..SEPARATOR.len_utf8()]
        } else {
            trimmed
        }
    }

    /// Trimmed form as a `Path`, so that symlinks are not followed by
    /// metadata calls.
    pub fn as_path(&self) -> &Path {
        Path::new(self.trimmed())
    }

    /// Append an already qualified relative path.
    pub fn join(&self, relative: &str) -> QualifiedPath {
        QualifiedPath::new(format!("{}{}", self.0, relative))
    }

    pub fn join_file(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.0, name))
    }

    /// Split into the containing directory and the last component.
    /// Returns `None` for a filesystem root.
    pub fn split_last(&self) -> Option<(QualifiedPath, &str)> {
        let trimmed = self.0.trim_end_matches(SEPARATOR);
        let idx = trimmed.rfind(SEPARATOR)?;
        let name = &trimmed[idx + SEPARATOR.len_utf8()..];
        if name.is_empty() {
            return None;
        }
        Some((QualifiedPath::new(&trimmed[..=idx]), name))
    }
}

impl fmt::Display for QualifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
