//! Cross-tree validation.
//!
//! Directories and files are paired by relative path; absolute paths are
//! never compared. Ignored nodes take no part. Archives store a linked
//! directory as a plain one, so link-ness is only compared between live
//! trees.

use crate::archive::ArchivedBackup;
use crate::fs::metadata::same_time;
use crate::fs::FileStat;
use crate::scan::AnalyzedBackup;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    OnlyInFirst { path: String },
    OnlyInSecond { path: String },
    Differs { path: String, field: &'static str },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::OnlyInFirst { path } => write!(f, "{path} not found in second tree"),
            Mismatch::OnlyInSecond { path } => write!(f, "{path} not found in first tree"),
            Mismatch::Differs { path, field } => write!(f, "{path} mismatch on {field}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DirView {
    name: String,
    is_link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileView {
    name: String,
    stat: FileStat,
}

#[derive(Debug, Default)]
struct TreeView {
    dirs: BTreeMap<String, DirView>,
    files: BTreeMap<String, FileView>,
}

impl TreeView {
    fn of_backup(backup: &AnalyzedBackup) -> Self {
        let mut view = TreeView::default();
        let tree = backup.tree();
        for dir in backup.dirs().filter(|&id| !tree.is_excluded(id)) {
            let node = tree.dir(dir);
            view.dirs.insert(
                tree.relative_path(dir).to_string(),
                DirView {
                    name: node.name.clone(),
                    is_link: node.is_link,
                },
            );
            for file in tree.kept_files(dir) {
                view.files.insert(
                    format!("{}{}", tree.relative_path(dir), file.name),
                    FileView {
                        name: file.name.clone(),
                        stat: file.stat,
                    },
                );
            }
        }
        view
    }

    fn of_archive(archive: &ArchivedBackup) -> Self {
        let mut view = TreeView::default();
        for id in archive.ids() {
            let relative = archive.relative_path(id);
            view.dirs.insert(
                relative.to_string(),
                DirView {
                    name: archive.name(id).to_string(),
                    is_link: archive.node(id).is_link,
                },
            );
            for entry in archive.get(id).entries() {
                view.files.insert(
                    format!("{relative}{}", entry.name),
                    FileView {
                        name: entry.name.clone(),
                        stat: entry.stat,
                    },
                );
            }
        }
        view
    }
}

fn pair<'m, T>(
    first: &'m BTreeMap<String, T>,
    second: &'m BTreeMap<String, T>,
    mismatches: &mut Vec<Mismatch>,
) -> Vec<(&'m str, &'m T, &'m T)> {
    let mut pairs = Vec::new();
    for (path, a) in first {
        match second.get(path) {
            Some(b) => pairs.push((path.as_str(), a, b)),
            None => mismatches.push(Mismatch::OnlyInFirst { path: path.clone() }),
        }
    }
    for path in second.keys().filter(|path| !first.contains_key(*path)) {
        mismatches.push(Mismatch::OnlyInSecond { path: path.clone() });
    }
    pairs
}

fn compare(
    first: &TreeView,
    second: &TreeView,
    tolerance: Duration,
    compare_links: bool,
) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    let differs = |path: &str, field| Mismatch::Differs {
        path: path.to_string(),
        field,
    };

    for (path, a, b) in pair(&first.dirs, &second.dirs, &mut mismatches) {
        if a.name != b.name {
            mismatches.push(differs(path, "name"));
        }
        if compare_links && a.is_link != b.is_link {
            mismatches.push(differs(path, "is_link"));
        }
    }

    for (path, a, b) in pair(&first.files, &second.files, &mut mismatches) {
        if a.name != b.name {
            mismatches.push(differs(path, "name"));
        }
        if a.stat.size != b.stat.size {
            mismatches.push(differs(path, "size"));
        }
        if !same_time(a.stat.modified, b.stat.modified, tolerance) {
            mismatches.push(differs(path, "last write time"));
        }
    }

    for mismatch in &mismatches {
        warn!(%mismatch, "Validation mismatch");
    }
    info!(mismatches = mismatches.len(), "Validation finished");
    mismatches
}

/// Compare a live tree with an archive of it
pub fn validate_against_archive(
    source: &AnalyzedBackup,
    archive: &ArchivedBackup,
    tolerance: Duration,
) -> Vec<Mismatch> {
    info!(source = %source.root(), archive = %archive.root(), "Validating against archive");
    let mut first = TreeView::of_backup(source);
    for file in first.files.values_mut() {
        file.stat.modified = archive.stored_time(file.stat.modified);
    }
    compare(&first, &TreeView::of_archive(archive), tolerance, false)
}

/// Compare two live trees. `other` is expected to have its rules applied
/// softly (see [`AnalyzedBackup::mark_ignored`]).
pub fn validate_against_backup(
    source: &AnalyzedBackup,
    other: &AnalyzedBackup,
    tolerance: Duration,
) -> Vec<Mismatch> {
    info!(source = %source.root(), other = %other.root(), "Validating against backup");
    compare(&TreeView::of_backup(source), &TreeView::of_backup(other), tolerance, true)
}
