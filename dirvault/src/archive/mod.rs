//! Encrypted container codec.
//!
//! Every archived directory holds at most one container named
//! [`CONTAINER_NAME`] with the directory's files as flat entries. The engine
//! only talks to containers through [`ArchiveCodec`].

pub mod archived;
pub mod zip_codec;

pub use archived::{ArchivedBackup, ArchivedDir, ArchivedDirId};
pub use zip_codec::ZipAesCodec;

use crate::fs::FileStat;
use crate::utils::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const CONTAINER_NAME: &str = "files.dv.zip";

/// Containers are written here first and renamed into place
pub const STAGING_NAME: &str = "files.dv.zip.tmp";

/// AES key size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum CipherStrength {
    Aes128,
    Aes256,
}

impl TryFrom<u16> for CipherStrength {
    type Error = EngineError;

    fn try_from(bits: u16) -> Result<Self> {
        match bits {
            128 => Ok(CipherStrength::Aes128),
            256 => Ok(CipherStrength::Aes256),
            other => Err(EngineError::InvalidCipherStrength(other)),
        }
    }
}

impl From<CipherStrength> for u16 {
    fn from(strength: CipherStrength) -> u16 {
        match strength {
            CipherStrength::Aes128 => 128,
            CipherStrength::Aes256 => 256,
        }
    }
}

impl fmt::Display for CipherStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AES-{}", u16::from(*self))
    }
}

/// A file to be stored in a container
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Entry metadata read from a container without decompressing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub stat: FileStat,
}

pub trait ArchiveCodec: Send + Sync {
    /// Write `entries` into a new container at `container`, replacing any
    /// file already there.
    fn compress(
        &self,
        entries: &[PendingEntry],
        container: &Path,
        password: &str,
        strength: CipherStrength,
    ) -> Result<()>;

    fn list_entries(&self, container: &Path) -> Result<Vec<ArchiveEntry>>;

    /// Unpack every entry into `destination`, restoring timestamps.
    fn extract(&self, container: &Path, password: &str, destination: &Path) -> Result<()>;

    /// `full = false` only checks the password; `full = true` reads every
    /// entry to the end.
    fn verify(&self, container: &Path, password: &str, full: bool) -> Result<()>;

    /// Timestamps the container format can hold. Times outside are stored
    /// clamped to the nearest end. `None` means no limit.
    fn timestamp_range(&self) -> Option<RangeInclusive<SystemTime>> {
        None
    }
}

pub fn container_path(dir: &Path) -> PathBuf {
    dir.join(CONTAINER_NAME)
}

/// Compress `entries` into the container of `dir` through a staging file,
/// so a failed write never leaves a partial container behind.
pub fn write_container(
    codec: &dyn ArchiveCodec,
    entries: &[PendingEntry],
    dir: &Path,
    password: &str,
    strength: CipherStrength,
) -> Result<()> {
    let staging = dir.join(STAGING_NAME);
    if let Err(e) = codec.compress(entries, &staging, password, strength) {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }
    let target = container_path(dir);
    std::fs::rename(&staging, &target).map_err(|e| EngineError::fs(&target, e))
}
