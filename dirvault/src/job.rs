//! Job files: what to back up, where, and what to check afterwards.
//!
//! A job file is a JSON list of jobs:
//!
//! ```json
//! [
//!   { "type": "backup", "source": "/data/photos", "operations": [
//!       { "type": "compress", "destination": "/mnt/backups", "cipher_strength": 256 },
//!       { "type": "validate_against_archive", "archive": "/mnt/backups/photos" } ] },
//!   { "type": "archive", "source": "/mnt/backups/photos", "operations": [
//!       { "type": "verify_integrity", "password_only": false } ] }
//! ]
//! ```
//!
//! A fatal error ends its job; the runner moves on to the next one.

use crate::archive::{ArchivedBackup, CipherStrength};
use crate::diff::BackupDiff;
use crate::engine::Engine;
use crate::executor::batch::BatchOutcome;
use crate::executor::{commit, CommitReport};
use crate::fs::QualifiedPath;
use crate::scan::{AnalyzedBackup, ScanMode};
use crate::utils::{EngineError, Result};
use crate::validate::{validate_against_archive, validate_against_backup, Mismatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    /// Operations on a live directory
    Backup {
        source: PathBuf,
        operations: Vec<BackupOperation>,
    },
    /// Operations on an archived tree
    Archive {
        source: PathBuf,
        operations: Vec<ArchiveOperation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackupOperation {
    /// Archive into `destination`, incrementally when an archive is already there
    Compress {
        destination: PathBuf,
        /// AES key size, 128 or 256
        cipher_strength: u16,
    },
    /// Overwrite every source file named `name_in_backup` with `file`
    CopyFile { file: PathBuf, name_in_backup: String },
    ValidateAgainstArchive { archive: PathBuf },
    ValidateAgainstBackup { backup: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveOperation {
    Extract { destination: PathBuf },
    /// `password_only = false` also checks the integrity of every entry
    VerifyIntegrity { password_only: bool },
}

impl Job {
    pub fn source(&self) -> &Path {
        match self {
            Job::Backup { source, .. } | Job::Archive { source, .. } => source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Backup { .. } => "backup",
            Job::Archive { .. } => "archive",
        }
    }
}

impl BackupOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BackupOperation::Compress { .. } => "compress",
            BackupOperation::CopyFile { .. } => "copy_file",
            BackupOperation::ValidateAgainstArchive { .. } => "validate_against_archive",
            BackupOperation::ValidateAgainstBackup { .. } => "validate_against_backup",
        }
    }
}

impl ArchiveOperation {
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveOperation::Extract { .. } => "extract",
            ArchiveOperation::VerifyIntegrity { .. } => "verify_integrity",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Containers that could not be listed when the archive was opened
    Listed { outcome: BatchOutcome },
    Compressed { outcome: BatchOutcome },
    Committed { report: CommitReport },
    CopiedFile { overwritten: usize },
    Validated { mismatches: Vec<Mismatch> },
    Extracted { outcome: BatchOutcome },
    Verified { outcome: BatchOutcome },
}

impl OperationOutcome {
    pub fn error_count(&self) -> usize {
        match self {
            OperationOutcome::Listed { outcome }
            | OperationOutcome::Compressed { outcome }
            | OperationOutcome::Extracted { outcome }
            | OperationOutcome::Verified { outcome } => outcome.error_count(),
            OperationOutcome::Committed { report } => report.error_count(),
            OperationOutcome::CopiedFile { .. } => 0,
            OperationOutcome::Validated { mismatches } => mismatches.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: &'static str,
    pub outcome: OperationOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub kind: &'static str,
    pub source: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub operations: Vec<OperationReport>,
    /// Fatal error that ended the job
    pub error: Option<String>,
}

impl JobReport {
    pub fn error_count(&self) -> usize {
        let fatal = usize::from(self.error.is_some());
        fatal
            + self
                .operations
                .iter()
                .map(|op| op.outcome.error_count())
                .sum::<usize>()
    }

    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

/// Load a JSON job file
pub fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::fs(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Sample job list rooted at `base`
pub fn example_jobs(base: &Path) -> Vec<Job> {
    vec![
        Job::Backup {
            source: base.join("example backup"),
            operations: vec![
                BackupOperation::Compress {
                    destination: base.join("example archive"),
                    cipher_strength: 256,
                },
                BackupOperation::CopyFile {
                    file: base.join("example.json"),
                    name_in_backup: "overwrite this.json".to_string(),
                },
                BackupOperation::ValidateAgainstArchive {
                    archive: base.join("example archive").join("example backup"),
                },
                BackupOperation::ValidateAgainstBackup {
                    backup: base.join("backup dir"),
                },
            ],
        },
        Job::Archive {
            source: base.join("example archive").join("example backup"),
            operations: vec![
                ArchiveOperation::Extract {
                    destination: base.join("dir to extract to"),
                },
                ArchiveOperation::VerifyIntegrity {
                    password_only: true,
                },
            ],
        },
    ]
}

pub fn write_example(path: &Path, base: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_jobs(base))?;
    std::fs::write(path, json).map_err(|e| EngineError::fs(path, e))
}

/// Run every job in order. Stops early only on cancellation.
pub fn run_jobs(engine: &Engine, jobs: &[Job], password: &str) -> Vec<JobReport> {
    let mut reports = Vec::with_capacity(jobs.len());
    for job in jobs {
        if engine.is_cancelled() {
            warn!(remaining = jobs.len() - reports.len(), "Cancelled, skipping remaining jobs");
            break;
        }
        reports.push(run_job(engine, job, password));
    }
    reports
}

pub fn run_job(engine: &Engine, job: &Job, password: &str) -> JobReport {
    let started_at = Utc::now();
    let start_time = Instant::now();
    info!(kind = job.kind(), source = %job.source().display(), "Starting job");

    let mut operations = Vec::new();
    let result = match job {
        Job::Backup {
            source,
            operations: ops,
        } => run_backup(engine, source, ops, password, &mut operations),
        Job::Archive {
            source,
            operations: ops,
        } => run_archive(engine, source, ops, password, &mut operations),
    };

    let error = result.err().map(|e| {
        error!(kind = job.kind(), source = %job.source().display(), error = %e, "Job failed");
        e.to_string()
    });

    let report = JobReport {
        kind: job.kind(),
        source: job.source().to_path_buf(),
        started_at,
        duration_secs: start_time.elapsed().as_secs(),
        operations,
        error,
    };
    info!(
        kind = report.kind,
        errors = report.error_count(),
        duration_secs = report.duration_secs,
        "Job finished"
    );
    report
}

fn run_backup(
    engine: &Engine,
    source_dir: &Path,
    ops: &[BackupOperation],
    password: &str,
    reports: &mut Vec<OperationReport>,
) -> Result<()> {
    let mut source = AnalyzedBackup::analyze(engine, source_dir, ScanMode::Filtered)?;

    for op in ops {
        engine.check_cancelled()?;
        info!(operation = op.name(), source = %source.root(), "Initiating operation");

        let outcome = match op {
            BackupOperation::Compress {
                destination,
                cipher_strength,
            } => {
                let strength = CipherStrength::try_from(*cipher_strength)?;
                compress(engine, &source, destination, password, strength)?
            }
            BackupOperation::CopyFile {
                file,
                name_in_backup,
            } => {
                let overwritten = copy_file(&source, file, name_in_backup)?;
                // Stats changed on disk
                source = AnalyzedBackup::analyze(engine, source_dir, ScanMode::Filtered)?;
                OperationOutcome::CopiedFile { overwritten }
            }
            BackupOperation::ValidateAgainstArchive { archive } => {
                let archive = open_archive(engine, archive, password, reports)?;
                OperationOutcome::Validated {
                    mismatches: validate_against_archive(&source, &archive, engine.timestamp_tolerance()),
                }
            }
            BackupOperation::ValidateAgainstBackup { backup } => {
                let mut other = AnalyzedBackup::analyze(engine, backup, ScanMode::Unfiltered)?;
                other.mark_ignored()?;
                OperationOutcome::Validated {
                    mismatches: validate_against_backup(&source, &other, engine.timestamp_tolerance()),
                }
            }
        };

        reports.push(OperationReport {
            operation: op.name(),
            outcome,
        });
    }

    Ok(())
}

/// Incremental when the archive already exists, full otherwise
fn compress(
    engine: &Engine,
    source: &AnalyzedBackup,
    destination: &Path,
    password: &str,
    strength: CipherStrength,
) -> Result<OperationOutcome> {
    let backup_root = QualifiedPath::from_path(destination)?;
    let archive_root = source.destination_in(&backup_root, source.top());

    if !archive_root.as_path().is_dir() {
        let outcome = source.compress(engine, destination, password, strength)?;
        return Ok(OperationOutcome::Compressed { outcome });
    }

    let archived = ArchivedBackup::open(engine, archive_root.as_path(), password)?;
    let diff = BackupDiff::compare(source, &archived, engine.timestamp_tolerance());
    let report = commit(engine, &diff, password, strength)?;
    Ok(OperationOutcome::Committed { report })
}

fn copy_file(source: &AnalyzedBackup, file: &Path, name_in_backup: &str) -> Result<usize> {
    let content = std::fs::read(file).map_err(|e| EngineError::fs(file, e))?;
    let tree = source.tree();
    let mut overwritten = 0;

    for id in source.files() {
        let node = tree.file(id);
        if node.is_ignored || node.name != name_in_backup {
            continue;
        }
        let target = tree.file_absolute_path(id);
        std::fs::write(&target, &content).map_err(|e| EngineError::fs(&target, e))?;
        overwritten += 1;
        info!(count = overwritten, target = %target.display(), from = %file.display(), "Overwritten");
    }

    Ok(overwritten)
}

/// Open an archive, reporting containers that could not be listed
fn open_archive(
    engine: &Engine,
    root: &Path,
    password: &str,
    reports: &mut Vec<OperationReport>,
) -> Result<ArchivedBackup> {
    let archive = ArchivedBackup::open(engine, root, password)?;
    if !archive.listing_outcome().is_clean() {
        reports.push(OperationReport {
            operation: "open_archive",
            outcome: OperationOutcome::Listed {
                outcome: archive.listing_outcome().clone(),
            },
        });
    }
    Ok(archive)
}

fn run_archive(
    engine: &Engine,
    archive_dir: &Path,
    ops: &[ArchiveOperation],
    password: &str,
    reports: &mut Vec<OperationReport>,
) -> Result<()> {
    let archive = open_archive(engine, archive_dir, password, reports)?;

    for op in ops {
        engine.check_cancelled()?;
        info!(operation = op.name(), archive = %archive.root(), "Initiating operation");

        let outcome = match op {
            ArchiveOperation::Extract { destination } => OperationOutcome::Extracted {
                outcome: archive.extract(engine, destination, password)?,
            },
            ArchiveOperation::VerifyIntegrity { password_only } => OperationOutcome::Verified {
                outcome: archive.verify(engine, password, !password_only)?,
            },
        };

        reports.push(OperationReport {
            operation: op.name(),
            outcome,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::CONTAINER_NAME;
    use crate::test_support::{engine, write};
    use tempfile::TempDir;

    #[test]
    fn test_parse_job_file() -> Result<()> {
        let jobs: Vec<Job> = serde_json::from_str(
            r#"[
                { "type": "backup", "source": "/data/root", "operations": [
                    { "type": "compress", "destination": "/backups", "cipher_strength": 128 },
                    { "type": "copy_file", "file": "/etc/app.json", "name_in_backup": "app.json" }
                ] },
                { "type": "archive", "source": "/backups/root", "operations": [
                    { "type": "verify_integrity", "password_only": false }
                ] }
            ]"#,
        )?;

        assert_eq!(jobs.len(), 2);
        match &jobs[0] {
            Job::Backup { operations, .. } => assert_eq!(
                operations[0],
                BackupOperation::Compress {
                    destination: PathBuf::from("/backups"),
                    cipher_strength: 128
                }
            ),
            other => panic!("unexpected job: {other:?}"),
        }
        assert_eq!(jobs[1].kind(), "archive");
        Ok(())
    }

    #[test]
    fn test_example_round_trips() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("example.json");
        write_example(&path, temp_dir.path())?;
        assert_eq!(load_jobs(&path)?, example_jobs(temp_dir.path()));
        Ok(())
    }

    #[test]
    fn test_backup_then_archive_jobs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let source = temp_dir.path().join("root");
        let backups = temp_dir.path().join("backups");
        let restore = temp_dir.path().join("restore");
        write(&source, "a/settings.json", b"{}");
        write(&source, "b/settings.json", b"{}");
        write(&source, "b/data.bin", b"data");
        write(temp_dir.path(), "new-settings.json", b"{\"v\": 2}");

        let jobs = vec![
            Job::Backup {
                source: source.clone(),
                operations: vec![
                    BackupOperation::Compress {
                        destination: backups.clone(),
                        cipher_strength: 256,
                    },
                    BackupOperation::CopyFile {
                        file: temp_dir.path().join("new-settings.json"),
                        name_in_backup: "settings.json".to_string(),
                    },
                    BackupOperation::Compress {
                        destination: backups.clone(),
                        cipher_strength: 256,
                    },
                    BackupOperation::ValidateAgainstArchive {
                        archive: backups.join("root"),
                    },
                ],
            },
            Job::Archive {
                source: backups.join("root"),
                operations: vec![
                    ArchiveOperation::VerifyIntegrity {
                        password_only: false,
                    },
                    ArchiveOperation::Extract {
                        destination: restore.clone(),
                    },
                ],
            },
        ];

        let reports = run_jobs(&engine, &jobs, "pw");
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(JobReport::is_clean), "{reports:#?}");

        let ops = &reports[0].operations;
        assert!(matches!(ops[0].outcome, OperationOutcome::Compressed { .. }));
        assert!(matches!(ops[1].outcome, OperationOutcome::CopiedFile { overwritten: 2 }));
        match &ops[2].outcome {
            OperationOutcome::Committed { report } => assert_eq!(report.summary.to_update, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(std::fs::read(restore.join("root/b/settings.json"))?, b"{\"v\": 2}");
        assert!(backups.join("root/a").join(CONTAINER_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_fatal_error_ends_only_its_job() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let source = temp_dir.path().join("root");
        write(&source, "x.txt", b"x");

        let jobs = vec![
            Job::Backup {
                source: source.clone(),
                operations: vec![
                    BackupOperation::Compress {
                        destination: temp_dir.path().join("first"),
                        cipher_strength: 192,
                    },
                    BackupOperation::Compress {
                        destination: temp_dir.path().join("never"),
                        cipher_strength: 256,
                    },
                ],
            },
            Job::Backup {
                source: source.clone(),
                operations: vec![BackupOperation::Compress {
                    destination: temp_dir.path().join("second"),
                    cipher_strength: 128,
                }],
            },
        ];

        let reports = run_jobs(&engine, &jobs, "pw");
        assert!(reports[0].error.as_deref().unwrap().contains("192"));
        assert!(reports[0].operations.is_empty());
        assert!(!temp_dir.path().join("never").exists());
        assert!(reports[1].is_clean());
        assert!(temp_dir.path().join("second/root").join(CONTAINER_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_unlistable_container_is_reported() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let source = temp_dir.path().join("root");
        for i in 0..12 {
            write(&source, &format!("d{i:02}/data.txt"), format!("payload {i}").as_bytes());
        }
        let backups = temp_dir.path().join("backups");
        let compress = Job::Backup {
            source: source.clone(),
            operations: vec![BackupOperation::Compress {
                destination: backups.clone(),
                cipher_strength: 256,
            }],
        };
        assert!(run_job(&engine, &compress, "pw").is_clean());

        // Outside the sampled password check
        let container = backups.join("root/d11").join(CONTAINER_NAME);
        std::fs::write(&container, b"not a zip")?;

        let report = run_job(&engine, &compress, "pw");
        assert!(report.error.is_none());
        assert_eq!(report.error_count(), 1, "{report:#?}");
        match &report.operations[0].outcome {
            OperationOutcome::Committed { report } => {
                let listing = report.phase("Listing").unwrap();
                assert_eq!(listing.failures[0].item, crate::test_support::rel("root/d11"));
                assert_eq!(report.summary.to_update, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let archive_job = Job::Archive {
            source: backups.join("root"),
            operations: vec![ArchiveOperation::VerifyIntegrity {
                password_only: false,
            }],
        };
        // The update rewrote the broken container
        assert!(run_job(&engine, &archive_job, "pw").is_clean());

        std::fs::write(&container, b"not a zip")?;
        let report = run_job(&engine, &archive_job, "pw");
        assert_eq!(report.operations[0].operation, "open_archive");
        assert!(matches!(report.operations[0].outcome, OperationOutcome::Listed { .. }));
        assert_eq!(report.error_count(), 2);
        Ok(())
    }

    #[test]
    fn test_wrong_password_fails_archive_job() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let source = temp_dir.path().join("root");
        write(&source, "x.txt", b"x");
        let backup = AnalyzedBackup::analyze(&engine, &source, ScanMode::Filtered)?;
        backup.compress(&engine, &temp_dir.path().join("b"), "right", CipherStrength::Aes256)?;

        let job = Job::Archive {
            source: temp_dir.path().join("b/root"),
            operations: vec![ArchiveOperation::VerifyIntegrity {
                password_only: true,
            }],
        };
        let report = run_job(&engine, &job, "wrong");
        assert!(report.error.is_some());
        assert_eq!(report.error_count(), 1);
        Ok(())
    }
}
