//! Archived tree: a scanned backup directory where every directory holds
//! at most one container.

use super::{ArchiveEntry, CONTAINER_NAME, STAGING_NAME};
use crate::engine::Engine;
use crate::executor::batch::{run_parallel, BatchOutcome};
use crate::fs::{ensure_empty_destination, QualifiedPath};
use crate::scan::{AnalyzedBackup, ScanMode};
use crate::tree::{DirId, DirNode, FileNode};
use crate::utils::{EngineError, Result};
use rayon::prelude::*;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;
use tracing::{error, info, warn};

/// Index of an [`ArchivedDir`], walk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchivedDirId(usize);

impl ArchivedDirId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct ArchivedDir {
    dir: DirId,
    parent: Option<ArchivedDirId>,
    has_container: bool,
    /// Sorted by name
    entries: Vec<FileNode>,
}

impl ArchivedDir {
    fn new(skeleton: &AnalyzedBackup, dir: DirId) -> Result<Self> {
        let node = skeleton.dir(dir);
        let mut container = None;

        for &id in &node.files {
            let name = skeleton.file(id).name.as_str();
            if name == STAGING_NAME {
                warn!(dir = %skeleton.relative_path(dir), "Ignoring leftover staging container");
                continue;
            }
            if name != CONTAINER_NAME {
                return Err(EngineError::ArchiveLayout {
                    dir: skeleton.relative_path(dir).to_string(),
                    reason: format!("unexpected file '{name}', only '{CONTAINER_NAME}' is allowed"),
                });
            }
            if container.replace(id).is_some() {
                return Err(EngineError::ArchiveLayout {
                    dir: skeleton.relative_path(dir).to_string(),
                    reason: "more than one container".to_string(),
                });
            }
        }

        Ok(Self {
            dir,
            parent: node.parent.map(|p| ArchivedDirId(p.index())),
            has_container: container.is_some(),
            entries: Vec::new(),
        })
    }

    pub fn has_container(&self) -> bool {
        self.has_container
    }

    pub fn parent(&self) -> Option<ArchivedDirId> {
        self.parent
    }

    /// Entries of the container, sorted by name
    pub fn entries(&self) -> &[FileNode] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&FileNode> {
        self.entries
            .binary_search_by(|entry| entry.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// An opened backup
#[derive(Debug)]
pub struct ArchivedBackup {
    skeleton: AnalyzedBackup,
    dirs: Vec<ArchivedDir>,
    top: ArchivedDirId,
    listing: BatchOutcome,
    timestamp_range: Option<RangeInclusive<SystemTime>>,
}

impl ArchivedBackup {
    /// Scan the archived tree at `root`, list every container and check
    /// `password` against a sample of them.
    pub fn open(engine: &Engine, root: &Path, password: &str) -> Result<Self> {
        let skeleton = AnalyzedBackup::analyze(engine, root, ScanMode::Unfiltered)?;

        let dir_ids: Vec<DirId> = skeleton.dirs().collect();
        let mut dirs = engine.install(|| {
            dir_ids
                .par_iter()
                .map(|&dir| ArchivedDir::new(&skeleton, dir))
                .collect::<Result<Vec<_>>>()
        })?;

        let with_container: Vec<usize> = (0..dirs.len()).filter(|&i| dirs[i].has_container).collect();
        let listings: Vec<OnceLock<Vec<ArchiveEntry>>> = dirs.iter().map(|_| OnceLock::new()).collect();
        let listing = run_parallel(
            engine,
            "Listing",
            &with_container,
            |&i| skeleton.relative_path(dirs[i].dir).to_string(),
            |&i| {
                let container = skeleton.tree().absolute_path(dirs[i].dir).join_file(CONTAINER_NAME);
                let entries = engine.codec().list_entries(&container)?;
                let _ = listings[i].set(entries);
                Ok(())
            },
        );
        engine.check_cancelled()?;

        for (dir, listed) in dirs.iter_mut().zip(listings) {
            let mut entries: Vec<FileNode> = listed
                .into_inner()
                .unwrap_or_default()
                .into_iter()
                .map(|entry| FileNode::new(engine.ids(), dir.dir, entry.name, entry.stat))
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            dir.entries = entries;
        }

        let top_relative = skeleton.relative_path(skeleton.top());
        let top = dirs
            .iter()
            .position(|dir| skeleton.relative_path(dir.dir) == top_relative)
            .map(ArchivedDirId)
            .ok_or_else(|| EngineError::ArchiveLayout {
                dir: top_relative.to_string(),
                reason: "top directory missing".to_string(),
            })?;

        let backup = Self {
            skeleton,
            dirs,
            top,
            listing,
            timestamp_range: engine.codec().timestamp_range(),
        };
        backup.check_password(engine, password)?;

        info!(
            root = %backup.root(),
            dirs = backup.dirs.len(),
            containers = with_container.len(),
            "Archive opened"
        );
        Ok(backup)
    }

    fn check_password(&self, engine: &Engine, password: &str) -> Result<()> {
        let sample: Vec<ArchivedDirId> = self
            .ids()
            .filter(|&id| self.dirs[id.0].has_container)
            .take(engine.password_sample_size())
            .collect();

        engine.install(|| {
            sample.par_iter().try_for_each(|&id| {
                let container = self.container_path(id).unwrap_or_default();
                engine
                    .codec()
                    .verify(&container, password, false)
                    .map_err(|e| {
                        error!(container = %container.display(), error = %e, "Password check failed");
                        EngineError::PasswordMismatch(format!("{}: {e}", container.display()))
                    })
            })
        })
    }

    /// Every archived directory, walk order
    pub fn ids(&self) -> impl Iterator<Item = ArchivedDirId> + '_ {
        (0..self.dirs.len()).map(ArchivedDirId)
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn top(&self) -> ArchivedDirId {
        self.top
    }

    pub fn get(&self, id: ArchivedDirId) -> &ArchivedDir {
        &self.dirs[id.0]
    }

    pub fn node(&self, id: ArchivedDirId) -> &DirNode {
        self.skeleton.dir(self.dirs[id.0].dir)
    }

    pub fn name(&self, id: ArchivedDirId) -> &str {
        &self.node(id).name
    }

    pub fn relative_path(&self, id: ArchivedDirId) -> &str {
        self.skeleton.relative_path(self.dirs[id.0].dir)
    }

    pub fn absolute_path(&self, id: ArchivedDirId) -> QualifiedPath {
        self.skeleton.tree().absolute_path(self.dirs[id.0].dir)
    }

    pub fn container_path(&self, id: ArchivedDirId) -> Option<PathBuf> {
        self.dirs[id.0]
            .has_container
            .then(|| self.absolute_path(id).join_file(CONTAINER_NAME))
    }

    /// Directory the archived top directory lives in
    pub fn located_in(&self) -> &QualifiedPath {
        self.skeleton.located_in()
    }

    pub fn root(&self) -> QualifiedPath {
        self.absolute_path(self.top)
    }

    /// `time` as a container entry would hold it
    pub fn stored_time(&self, time: SystemTime) -> SystemTime {
        match &self.timestamp_range {
            Some(range) => time.clamp(*range.start(), *range.end()),
            None => time,
        }
    }

    /// Failures met while listing containers
    pub fn listing_outcome(&self) -> &BatchOutcome {
        &self.listing
    }

    fn container_dirs(&self) -> Vec<ArchivedDirId> {
        self.ids().filter(|&id| self.dirs[id.0].has_container).collect()
    }

    /// Restore the archived tree into `target_root`. The destination must be
    /// missing or empty.
    pub fn extract(&self, engine: &Engine, target_root: &Path, password: &str) -> Result<BatchOutcome> {
        let target_root = QualifiedPath::from_path(target_root)?;
        let destination = target_root.join(self.relative_path(self.top));
        info!(archive = %self.root(), destination = %destination, "Extracting");
        ensure_empty_destination(&destination)?;

        for id in self.ids() {
            let target = target_root.join(self.relative_path(id));
            std::fs::create_dir_all(target.as_path())
                .map_err(|e| EngineError::fs(target.as_path(), e))?;
        }
        info!(dirs = self.dir_count(), "Created directory tree");

        let containers = self.container_dirs();
        let outcome = run_parallel(
            engine,
            "Extracting",
            &containers,
            |&id| self.relative_path(id).to_string(),
            |&id| {
                let container = self.absolute_path(id).join_file(CONTAINER_NAME);
                let target = target_root.join(self.relative_path(id));
                engine.codec().extract(&container, password, target.as_path())
            },
        );

        engine.check_cancelled()?;
        Ok(outcome)
    }

    /// Check every container. One failure is reported per failing container.
    pub fn verify(&self, engine: &Engine, password: &str, full: bool) -> Result<BatchOutcome> {
        let containers = self.container_dirs();
        info!(archive = %self.root(), containers = containers.len(), full, "Verifying");

        let outcome = run_parallel(
            engine,
            "Verifying",
            &containers,
            |&id| self.relative_path(id).to_string(),
            |&id| {
                let container = self.absolute_path(id).join_file(CONTAINER_NAME);
                engine.codec().verify(&container, password, full)
            },
        );

        engine.check_cancelled()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::CipherStrength;
    use crate::test_support::{config, engine, write};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Flip the first ciphertext byte of the first entry. The AES salt and
    /// password verifier stay intact.
    fn corrupt_payload(container: &Path) {
        let mut bytes = std::fs::read(container).unwrap();
        let name_len = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
        let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
        let payload = 30 + name_len + extra_len + 16 + 2;
        bytes[payload] ^= 0xff;
        std::fs::write(container, bytes).unwrap();
    }

    fn compressed(temp_dir: &TempDir, engine: &Engine) -> (AnalyzedBackup, PathBuf) {
        let root = temp_dir.path().join("root");
        write(&root, "top.txt", b"top level");
        write(&root, "a/x.txt", b"x content");
        write(&root, "a/b/y.txt", b"y content that is longer");
        write(&root, "c/z.bin", &[3u8; 2048]);
        std::fs::create_dir_all(root.join("empty")).unwrap();

        let source = AnalyzedBackup::analyze(engine, &root, ScanMode::Filtered).unwrap();
        let backups = temp_dir.path().join("backups");
        let outcome = source
            .compress(engine, &backups, "pw", CipherStrength::Aes256)
            .unwrap();
        assert!(outcome.is_clean());
        (source, backups.join("root"))
    }

    #[test]
    fn test_round_trip_listing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let (source, archive_root) = compressed(&temp_dir, &engine);

        let archived = ArchivedBackup::open(&engine, &archive_root, "pw")?;
        assert!(archived.listing_outcome().is_clean());
        assert_eq!(archived.dir_count(), source.tree().dir_count());
        assert_eq!(archived.relative_path(archived.top()), source.relative_path(source.top()));

        for (dir, id) in source.dirs().zip(archived.ids()) {
            assert_eq!(source.relative_path(dir), archived.relative_path(id));
            let entries = archived.get(id).entries();
            assert_eq!(entries.len(), source.dir(dir).files.len());
            for file in source.tree().kept_files(dir) {
                let entry = archived.get(id).entry(&file.name).unwrap();
                assert!(entry.stat.matches(&file.stat, Duration::from_secs(2)));
            }
        }
        Ok(())
    }

    #[test]
    fn test_wrong_password_is_fatal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let (_, archive_root) = compressed(&temp_dir, &engine);

        let result = ArchivedBackup::open(&engine, &archive_root, "not the password");
        assert!(matches!(result, Err(EngineError::PasswordMismatch(_))));
        Ok(())
    }

    #[test]
    fn test_unreadable_sampled_container_keeps_its_cause() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let (_, archive_root) = compressed(&temp_dir, &engine);
        std::fs::write(archive_root.join("a").join(CONTAINER_NAME), b"not a zip")?;

        match ArchivedBackup::open(&engine, &archive_root, "pw") {
            Err(EngineError::PasswordMismatch(cause)) => {
                assert!(cause.contains(CONTAINER_NAME), "{cause}");
                assert!(cause.contains("Archive error"), "{cause}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_misnamed_file_is_fatal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let (_, archive_root) = compressed(&temp_dir, &engine);
        write(&archive_root, "a/notes.txt", b"stray");

        match ArchivedBackup::open(&engine, &archive_root, "pw") {
            Err(EngineError::ArchiveLayout { dir, .. }) => assert!(dir.ends_with(&crate::test_support::rel("a"))),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_password_sampling_boundary() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let root = temp_dir.path().join("root");
        for i in 0..12 {
            write(&root, &format!("d{i:02}/data.txt"), format!("payload number {i}").as_bytes());
        }
        let source = AnalyzedBackup::analyze(&engine, &root, ScanMode::Filtered)?;
        let backups = temp_dir.path().join("backups");
        source.compress(&engine, &backups, "pw", CipherStrength::Aes256)?;

        // d10 holds the 11th container in walk order
        corrupt_payload(&backups.join("root/d10").join(CONTAINER_NAME));

        let archived = ArchivedBackup::open(&engine, &backups.join("root"), "pw")?;
        assert!(archived.verify(&engine, "pw", false)?.is_clean());

        let full = archived.verify(&engine, "pw", true)?;
        assert_eq!(full.error_count(), 1);
        assert_eq!(full.failures[0].item, crate::test_support::rel("root/d10"));
        Ok(())
    }

    #[test]
    fn test_listing_failure_is_best_effort() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut config = config();
        config.engine.password_sample_size = 1;
        let engine = Engine::new(&config)?;
        let (_, archive_root) = compressed(&temp_dir, &engine);

        std::fs::write(archive_root.join("c").join(CONTAINER_NAME), b"not a zip")?;

        let archived = ArchivedBackup::open(&engine, &archive_root, "pw")?;
        assert_eq!(archived.listing_outcome().error_count(), 1);
        let c = archived.ids().find(|&id| archived.name(id) == "c").unwrap();
        assert!(archived.get(c).has_container());
        assert!(archived.get(c).entries().is_empty());
        Ok(())
    }

    #[test]
    fn test_extract_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let engine = engine();
        let (_, archive_root) = compressed(&temp_dir, &engine);

        let archived = ArchivedBackup::open(&engine, &archive_root, "pw")?;
        let restore = temp_dir.path().join("restore");
        assert!(archived.extract(&engine, &restore, "pw")?.is_clean());

        let restored = restore.join("root");
        assert_eq!(std::fs::read(restored.join("a/b/y.txt"))?, b"y content that is longer");
        assert_eq!(std::fs::read(restored.join("c/z.bin"))?, vec![3u8; 2048]);
        assert!(restored.join("empty").is_dir());

        let again = archived.extract(&engine, &restore, "pw");
        assert!(matches!(again, Err(EngineError::DestinationNotEmpty(_))));
        Ok(())
    }
}
