//! AES-encrypted zip containers.
//!
//! Zip timestamps are DOS wall-clock values with two second resolution.
//! They are written and read as UTC so that a listing compares cleanly with
//! the live file regardless of the local time zone.

use super::{ArchiveCodec, ArchiveEntry, CipherStrength, PendingEntry};
use crate::config::{ArchiveConfig, Compression};
use crate::fs::FileStat;
use crate::utils::{EngineError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use filetime::FileTime;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Clone, Default)]
pub struct ZipAesCodec {
    compression: Compression,
    level: Option<i64>,
}

impl ZipAesCodec {
    pub fn new(compression: Compression, level: Option<i64>) -> Self {
        Self { compression, level }
    }

    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(config.compression, config.compression_level)
    }

    fn method(&self) -> CompressionMethod {
        match self.compression {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflate => CompressionMethod::Deflated,
            Compression::Zstd => CompressionMethod::Zstd,
        }
    }
}

fn aes_mode(strength: CipherStrength) -> AesMode {
    match strength {
        CipherStrength::Aes128 => AesMode::Aes128,
        CipherStrength::Aes256 => AesMode::Aes256,
    }
}

fn open_archive(container: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(container).map_err(|e| EngineError::fs(container, e))?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

/// DOS timestamps cover 1980-01-01 to 2107-12-31
fn zip_time_range() -> RangeInclusive<SystemTime> {
    let earliest = from_zip_time(zip::DateTime::default());
    let latest = zip::DateTime::from_date_and_time(2107, 12, 31, 23, 59, 58)
        .map(from_zip_time)
        .unwrap_or(earliest);
    earliest..=latest
}

pub(crate) fn to_zip_time(time: SystemTime) -> zip::DateTime {
    let range = zip_time_range();
    let utc: DateTime<Utc> = time.clamp(*range.start(), *range.end()).into();
    u16::try_from(utc.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                utc.month() as u8,
                utc.day() as u8,
                utc.hour() as u8,
                utc.minute() as u8,
                utc.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

pub(crate) fn from_zip_time(time: zip::DateTime) -> SystemTime {
    NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())
        .and_then(|date| {
            date.and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())
        })
        .map(|naive| naive.and_utc().into())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

impl ArchiveCodec for ZipAesCodec {
    fn compress(
        &self,
        entries: &[PendingEntry],
        container: &Path,
        password: &str,
        strength: CipherStrength,
    ) -> Result<()> {
        let file = File::create(container).map_err(|e| EngineError::fs(container, e))?;
        let mut writer = ZipWriter::new(BufWriter::new(file));

        for entry in entries {
            let metadata =
                std::fs::metadata(&entry.path).map_err(|e| EngineError::fs(&entry.path, e))?;
            let options = SimpleFileOptions::default()
                .compression_method(self.method())
                .compression_level(self.level)
                .last_modified_time(to_zip_time(metadata.modified()?))
                .large_file(metadata.len() >= u32::MAX as u64)
                .with_aes_encryption(aes_mode(strength), password);

            writer.start_file(entry.name.as_str(), options)?;
            let mut source = File::open(&entry.path).map_err(|e| EngineError::fs(&entry.path, e))?;
            io::copy(&mut source, &mut writer)?;
        }

        let mut inner = writer.finish()?;
        io::Write::flush(&mut inner)?;
        debug!(container = %container.display(), entries = entries.len(), "Container written");
        Ok(())
    }

    fn list_entries(&self, container: &Path) -> Result<Vec<ArchiveEntry>> {
        let mut archive = open_archive(container)?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.is_dir() {
                continue;
            }
            let modified = entry
                .last_modified()
                .map(from_zip_time)
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(ArchiveEntry {
                name: entry.name().to_string(),
                stat: FileStat {
                    size: entry.size(),
                    modified,
                },
            });
        }

        Ok(entries)
    }

    fn extract(&self, container: &Path, password: &str, destination: &Path) -> Result<()> {
        let mut archive = open_archive(container)?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index_decrypt(i, password.as_bytes())?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(EngineError::ArchiveLayout {
                    dir: container.display().to_string(),
                    reason: format!("entry '{}' escapes the target directory", entry.name()),
                });
            };
            let target = destination.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| EngineError::fs(&target, e))?;
                continue;
            }

            let mut out = File::create(&target).map_err(|e| EngineError::fs(&target, e))?;
            io::copy(&mut entry, &mut out)?;
            drop(out);

            if let Some(modified) = entry.last_modified() {
                let mtime = FileTime::from_system_time(from_zip_time(modified));
                filetime::set_file_mtime(&target, mtime).map_err(|e| EngineError::fs(&target, e))?;
            }
        }

        Ok(())
    }

    fn verify(&self, container: &Path, password: &str, full: bool) -> Result<()> {
        let mut archive = open_archive(container)?;

        for i in 0..archive.len() {
            // The AES password verifier is checked when the entry is opened
            let mut entry = archive.by_index_decrypt(i, password.as_bytes())?;
            if !full {
                return Ok(());
            }
            io::copy(&mut entry, &mut io::sink())?;
        }

        Ok(())
    }

    fn timestamp_range(&self) -> Option<RangeInclusive<SystemTime>> {
        Some(zip_time_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_container, CONTAINER_NAME};
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn fixture(dir: &Path) -> Vec<PendingEntry> {
        let a = dir.join("a.txt");
        let b = dir.join("b.bin");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, vec![7u8; 4096]).unwrap();
        set_mtime(&a, 1_700_000_001);
        set_mtime(&b, 1_700_000_100);
        vec![
            PendingEntry {
                name: "a.txt".into(),
                path: a,
            },
            PendingEntry {
                name: "b.bin".into(),
                path: b,
            },
        ]
    }

    #[test]
    fn test_zip_time_round_trip_is_within_two_seconds() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_001);
        let back = from_zip_time(to_zip_time(t));
        let drift = t.duration_since(back).unwrap();
        assert!(drift <= Duration::from_secs(2));
    }

    #[test]
    fn test_out_of_range_times_are_clamped() {
        let range = zip_time_range();
        let before = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400 * 365);
        assert_eq!(from_zip_time(to_zip_time(before)), *range.start());

        let after = *range.end() + Duration::from_secs(86_400 * 400);
        assert_eq!(from_zip_time(to_zip_time(after)), *range.end());
        assert!(range.start() < range.end());
    }

    #[test]
    fn test_list_without_password() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = fixture(temp_dir.path());
        let out = temp_dir.path().join("out");
        std::fs::create_dir(&out)?;

        let codec = ZipAesCodec::default();
        write_container(&codec, &entries, &out, "secret", CipherStrength::Aes256)?;
        assert!(out.join(CONTAINER_NAME).exists());

        let listed = codec.list_entries(&out.join(CONTAINER_NAME))?;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "a.txt");
        assert_eq!(listed[0].stat.size, 11);
        assert_eq!(listed[1].stat.size, 4096);
        let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_100);
        assert!(crate::fs::metadata::same_time(
            listed[1].stat.modified,
            expected,
            Duration::from_secs(2)
        ));
        Ok(())
    }

    #[test]
    fn test_extract_restores_content_and_time() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = fixture(temp_dir.path());
        let container = temp_dir.path().join(CONTAINER_NAME);
        let codec = ZipAesCodec::new(Compression::Zstd, None);
        codec.compress(&entries, &container, "pw", CipherStrength::Aes128)?;

        let target = temp_dir.path().join("restored");
        std::fs::create_dir(&target)?;
        codec.extract(&container, "pw", &target)?;

        assert_eq!(std::fs::read(target.join("a.txt"))?, b"hello world");
        let stat = FileStat::from_path(&target.join("b.bin"))?;
        assert_eq!(stat.size, 4096);
        let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_100);
        assert!(crate::fs::metadata::same_time(
            stat.modified,
            expected,
            Duration::from_secs(2)
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_password_fails_verify() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = fixture(temp_dir.path());
        let container = temp_dir.path().join(CONTAINER_NAME);
        let codec = ZipAesCodec::default();
        codec.compress(&entries, &container, "right", CipherStrength::Aes256)?;

        codec.verify(&container, "right", false)?;
        codec.verify(&container, "right", true)?;
        assert!(codec.verify(&container, "wrong", false).is_err());
        assert!(codec.extract(&container, "wrong", temp_dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_staging_file_is_removed_on_failure() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = vec![PendingEntry {
            name: "missing.txt".into(),
            path: temp_dir.path().join("missing.txt"),
        }];
        let codec = ZipAesCodec::default();
        assert!(write_container(&codec, &entries, temp_dir.path(), "pw", CipherStrength::Aes256).is_err());
        assert!(!temp_dir.path().join(crate::archive::STAGING_NAME).exists());
        assert!(!temp_dir.path().join(CONTAINER_NAME).exists());
        Ok(())
    }
}
