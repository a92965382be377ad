//! File metadata used for content equality.
//!
//! Only size and last-write time are compared; contents are never hashed.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Size and last-write time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: SystemTime,
}

impl Default for FileStat {
    fn default() -> Self {
        Self {
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
        }
    }
}

impl FileStat {
    /// Read metadata for a path, following symlinks to the target file
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Same size and timestamps no further apart than `tolerance`
    pub fn matches(&self, other: &FileStat, tolerance: Duration) -> bool {
        self.size == other.size && same_time(self.modified, other.modified, tolerance)
    }
}

/// Timestamps compare equal within `tolerance` in either direction.
pub fn same_time(a: SystemTime, b: SystemTime, tolerance: Duration) -> bool {
    let diff = match a.duration_since(b) {
        Ok(d) => d,
        Err(e) => e.duration(),
    };
    diff <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extract_stat() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let stat = FileStat::from_path(temp_file.path())?;

        assert_eq!(stat.size, 12);
        assert!(stat.modified > SystemTime::UNIX_EPOCH);

        Ok(())
    }

    #[test]
    fn test_same_time_tolerance() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let two = Duration::from_secs(2);
        assert!(same_time(t, t + Duration::from_millis(1999), two));
        assert!(same_time(t + Duration::from_secs(2), t, two));
        assert!(!same_time(t, t + Duration::from_millis(2001), two));
        assert!(!same_time(t + Duration::from_secs(3), t, two));
    }

    #[test]
    fn test_matches_requires_exact_size() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let a = FileStat { size: 10, modified: t };
        let b = FileStat { size: 11, modified: t };
        assert!(!a.matches(&b, Duration::from_secs(2)));
        assert!(a.matches(&a, Duration::ZERO));
    }
}
