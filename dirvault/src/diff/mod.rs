//! Reconciliation between a live tree and its archived counterpart.
//!
//! Directories are paired by relative path. Unpaired source directories
//! are additions, unpaired archived directories deletions. Additions whose
//! content equals a deletion are turned into moves: first by equal name
//! (the directory moved), then by equal file count (it was renamed).
//!
//! Deletions are visited in archive walk order and candidates in source
//! walk order, so the first match in walk order wins.

use crate::archive::{ArchivedBackup, ArchivedDirId};
use crate::fs::metadata::same_time;
use crate::scan::AnalyzedBackup;
use crate::tree::DirId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub struct BackupDiff<'a> {
    source: &'a AnalyzedBackup,
    destination: &'a ArchivedBackup,
    tolerance: Duration,

    pub dirs_to_add: BTreeSet<DirId>,
    /// Archived directory → its changed source directory
    pub dirs_to_update: BTreeMap<ArchivedDirId, DirId>,
    /// New location → archived directory whose container moves there
    pub dirs_to_move: BTreeMap<DirId, ArchivedDirId>,
    /// Every archived directory without a source counterpart, moved-from
    /// directories included
    pub all_dirs_to_delete: BTreeSet<ArchivedDirId>,
    /// Deletions whose parent is not deleted
    pub top_dirs_to_delete: BTreeSet<ArchivedDirId>,
    unresolved: BTreeSet<ArchivedDirId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub to_add: usize,
    pub to_update: usize,
    pub to_move: usize,
    pub to_delete: usize,
    pub top_to_delete: usize,
    pub unresolved: usize,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to update, {} to move, {} to delete ({} top level, {} not moved)",
            self.to_add,
            self.to_update,
            self.to_move,
            self.to_delete,
            self.top_to_delete,
            self.unresolved
        )
    }
}

impl<'a> BackupDiff<'a> {
    /// Classify every directory of `source` and `destination`.
    pub fn compare(
        source: &'a AnalyzedBackup,
        destination: &'a ArchivedBackup,
        tolerance: Duration,
    ) -> Self {
        let mut diff = Self {
            source,
            destination,
            tolerance,
            dirs_to_add: BTreeSet::new(),
            dirs_to_update: BTreeMap::new(),
            dirs_to_move: BTreeMap::new(),
            all_dirs_to_delete: BTreeSet::new(),
            top_dirs_to_delete: BTreeSet::new(),
            unresolved: BTreeSet::new(),
        };

        diff.pair_by_path();
        diff.detect_moves();
        diff.detect_renames();
        diff.find_top_deletions();

        info!(source = %source.root(), destination = %destination.root(), summary = %diff.summary(), "Diff computed");
        diff
    }

    fn pair_by_path(&mut self) {
        let source = self.source;
        let destination = self.destination;
        let archived: HashMap<&str, ArchivedDirId> = destination
            .ids()
            .map(|id| (destination.relative_path(id), id))
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        for dir in source.dirs().filter(|&id| !source.tree().is_excluded(id)) {
            let relative = source.relative_path(dir);
            seen.insert(relative);
            match archived.get(relative) {
                Some(&existing) => {
                    if !self.same_content(dir, existing) {
                        self.dirs_to_update.insert(existing, dir);
                    }
                }
                None => {
                    self.dirs_to_add.insert(dir);
                }
            }
        }

        for id in destination.ids() {
            if !seen.contains(destination.relative_path(id)) {
                self.all_dirs_to_delete.insert(id);
            }
        }
        self.unresolved = self.all_dirs_to_delete.clone();
    }

    /// Same non-ignored file count, and every file has an entry with the
    /// same name, size and timestamp.
    pub fn same_content(&self, dir: DirId, archived: ArchivedDirId) -> bool {
        let entries = self.destination.get(archived);
        let mut count = 0;
        for file in self.source.tree().kept_files(dir) {
            count += 1;
            let Some(entry) = entries.entry(&file.name) else {
                return false;
            };
            if entry.stat.size != file.stat.size
                || !same_time(
                    entry.stat.modified,
                    self.destination.stored_time(file.stat.modified),
                    self.tolerance,
                )
            {
                return false;
            }
        }
        count == entries.entries().len()
    }

    fn kept_file_count(&self, dir: DirId) -> usize {
        self.source.tree().kept_files(dir).count()
    }

    fn resolve(&mut self, candidate: DirId, deleted: ArchivedDirId) {
        debug!(
            from = %self.destination.relative_path(deleted),
            to = %self.source.relative_path(candidate),
            "Detected move"
        );
        self.dirs_to_add.remove(&candidate);
        self.dirs_to_move.insert(candidate, deleted);
        self.unresolved.remove(&deleted);
    }

    fn take_first_match<K: std::hash::Hash + Eq>(
        &self,
        groups: &mut HashMap<K, Vec<DirId>>,
        key: K,
        deleted: ArchivedDirId,
        accept: impl Fn(DirId) -> bool,
    ) -> Option<DirId> {
        let group = groups.get_mut(&key)?;
        let position = group
            .iter()
            .position(|&candidate| accept(candidate) && self.same_content(candidate, deleted))?;
        Some(group.remove(position))
    }

    fn detect_moves(&mut self) {
        let mut by_name: HashMap<String, Vec<DirId>> = HashMap::new();
        for &dir in &self.dirs_to_add {
            by_name
                .entry(self.source.dir(dir).name.clone())
                .or_default()
                .push(dir);
        }

        let deletions: Vec<ArchivedDirId> = self.all_dirs_to_delete.iter().copied().collect();
        for deleted in deletions {
            let name = self.destination.name(deleted).to_string();
            if let Some(candidate) = self.take_first_match(&mut by_name, name, deleted, |_| true) {
                self.resolve(candidate, deleted);
            }
        }
    }

    fn detect_renames(&mut self) {
        let mut by_count: HashMap<usize, Vec<DirId>> = HashMap::new();
        for &dir in &self.dirs_to_add {
            by_count.entry(self.kept_file_count(dir)).or_default().push(dir);
        }

        let source = self.source;
        let destination = self.destination;
        let deletions: Vec<ArchivedDirId> = self.unresolved.iter().copied().collect();
        for deleted in deletions {
            let count = destination.get(deleted).entries().len();
            let name = destination.name(deleted);
            let renamed = |candidate: DirId| source.dir(candidate).name != name;
            if let Some(candidate) = self.take_first_match(&mut by_count, count, deleted, renamed) {
                self.resolve(candidate, deleted);
            }
        }
    }

    fn find_top_deletions(&mut self) {
        self.top_dirs_to_delete = self
            .all_dirs_to_delete
            .iter()
            .copied()
            .filter(|&id| match self.destination.get(id).parent() {
                Some(parent) => !self.all_dirs_to_delete.contains(&parent),
                None => true,
            })
            .collect();
    }

    pub fn source(&self) -> &'a AnalyzedBackup {
        self.source
    }

    pub fn destination(&self) -> &'a ArchivedBackup {
        self.destination
    }

    /// Deletions not turned into a move or rename
    pub fn unresolved_deletions(&self) -> &BTreeSet<ArchivedDirId> {
        &self.unresolved
    }

    pub fn is_empty(&self) -> bool {
        self.dirs_to_add.is_empty()
            && self.dirs_to_update.is_empty()
            && self.dirs_to_move.is_empty()
            && self.all_dirs_to_delete.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            to_add: self.dirs_to_add.len(),
            to_update: self.dirs_to_update.len(),
            to_move: self.dirs_to_move.len(),
            to_delete: self.all_dirs_to_delete.len(),
            top_to_delete: self.top_dirs_to_delete.len(),
            unresolved: self.unresolved.len(),
        }
    }
}
