//! Tree builder for live directories.
//!
//! The walk is sequential, depth-first and pre-order with children in name
//! order, so two scans of the same tree agree on walk order. Ignore rules
//! are collected per directory while walking. Only the final stat pass runs
//! in parallel.

use crate::archive::{self, CipherStrength, PendingEntry};
use crate::engine::Engine;
use crate::executor::batch::{run_parallel, BatchOutcome};
use crate::executor::marker::write_marker;
use crate::fs::link::{link_status, LinkStatus};
use crate::fs::walker::list_children;
use crate::fs::{ensure_empty_destination, QualifiedPath, SEPARATOR};
use crate::progress::format_bytes;
use crate::rules::{is_rule_file, load_rule_file, RuleSet, Subject};
use crate::tree::{DirId, DirNode, FileId, FileNode, Tree};
use crate::utils::{EngineError, Result};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Parse rule files and drop matching nodes
    Filtered,
    /// Every file becomes a node, rule files included
    Unfiltered,
}

/// A scanned live directory tree
#[derive(Debug)]
pub struct AnalyzedBackup {
    tree: Tree,
}

struct Builder<'a> {
    engine: &'a Engine,
    mode: ScanMode,
    tree: Tree,
}

impl Builder<'_> {
    fn walk(&mut self, dir: DirId, mut rules: RuleSet) -> Result<()> {
        self.engine.check_cancelled()?;

        let is_top = self.tree.dir(dir).parent.is_none();
        let absolute = self.tree.absolute_path(dir);
        if link_status(absolute.as_path(), !is_top)? == LinkStatus::Link {
            debug!(path = %absolute, "Not descending into link");
            self.tree.dir_mut(dir).is_link = true;
            return Ok(());
        }

        let children = list_children(absolute.as_path())?;
        let parent_relative = self.tree.relative_path(dir).to_string();
        let located_in = self.tree.located_in().as_str().to_string();

        if self.mode == ScanMode::Filtered {
            for name in children.files.iter().filter(|name| is_rule_file(name)) {
                rules.extend(load_rule_file(&absolute.join_file(name))?);
            }
        }

        for name in &children.files {
            if self.mode == ScanMode::Filtered {
                if is_rule_file(name) {
                    continue;
                }
                let relative_path = format!("{parent_relative}{name}");
                let absolute_path = format!("{located_in}{relative_path}");
                let subject = Subject {
                    name,
                    relative_path: &relative_path,
                    absolute_path: &absolute_path,
                };
                if rules.is_match(&subject) {
                    debug!(path = %absolute_path, "Ignoring file");
                    continue;
                }
            }
            self.tree.add_file(self.engine.ids(), dir, name);
        }

        for name in &children.dirs {
            if self.mode == ScanMode::Filtered {
                let relative_path = format!("{parent_relative}{name}{SEPARATOR}");
                let absolute_path = format!("{located_in}{relative_path}");
                let subject = Subject {
                    name,
                    relative_path: &relative_path,
                    absolute_path: &absolute_path,
                };
                if rules.is_match(&subject) {
                    debug!(path = %absolute_path, "Ignoring directory");
                    continue;
                }
            }
            let subdir = self.tree.add_dir(self.engine.ids(), dir, name);
            self.walk(subdir, rules.inherited())?;
        }

        Ok(())
    }
}

impl AnalyzedBackup {
    /// Scan `root` into a fresh tree
    pub fn analyze(engine: &Engine, root: &Path, mode: ScanMode) -> Result<Self> {
        let start = Instant::now();
        let absolute = std::path::absolute(root).map_err(|e| EngineError::fs(root, e))?;
        let qualified = QualifiedPath::from_path(&absolute)?;
        let (located_in, top_name) = qualified.split_last().ok_or_else(|| {
            EngineError::Config(format!("{qualified} cannot be used as a top directory"))
        })?;

        info!(root = %qualified, ?mode, "Analyzing directory tree");

        let mut builder = Builder {
            engine,
            mode,
            tree: Tree::new(engine.ids(), located_in, top_name),
        };
        let top = builder.tree.top();
        builder.walk(top, RuleSet::new())?;

        let mut tree = builder.tree;
        engine.install(|| tree.stat_files());
        let total_bytes: u64 = tree.file_ids().map(|id| tree.file(id).stat.size).sum();

        info!(
            root = %qualified,
            dirs = tree.dir_count(),
            files = tree.file_count(),
            size = %format_bytes(total_bytes),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Analysis complete"
        );
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn top(&self) -> DirId {
        self.tree.top()
    }

    pub fn top_node(&self) -> &DirNode {
        self.tree.dir(self.tree.top())
    }

    /// Directory containing the top-most scanned directory
    pub fn located_in(&self) -> &QualifiedPath {
        self.tree.located_in()
    }

    /// Absolute path of the top-most scanned directory
    pub fn root(&self) -> QualifiedPath {
        self.tree.absolute_path(self.tree.top())
    }

    /// Every directory, walk order
    pub fn dirs(&self) -> impl Iterator<Item = DirId> + '_ {
        self.tree.dir_ids()
    }

    /// Every file, walk order
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.tree.file_ids()
    }

    pub fn dir(&self, id: DirId) -> &DirNode {
        self.tree.dir(id)
    }

    pub fn file(&self, id: FileId) -> &FileNode {
        self.tree.file(id)
    }

    pub fn relative_path(&self, id: DirId) -> &str {
        self.tree.relative_path(id)
    }

    /// Where `dir` lands when the tree is stored under `new_root`
    pub fn destination_in(&self, new_root: &QualifiedPath, dir: DirId) -> QualifiedPath {
        new_root.join(self.tree.relative_path(dir))
    }

    /// Files of `dir` to be stored in its container
    pub fn pending_entries(&self, dir: DirId) -> Vec<PendingEntry> {
        let base = self.tree.absolute_path(dir);
        self.tree
            .kept_files(dir)
            .map(|file| PendingEntry {
                name: file.name.clone(),
                path: base.join_file(&file.name),
            })
            .collect()
    }

    /// Soft-apply the ignore rules found in the tree. Rule files themselves
    /// are marked ignored.
    pub fn mark_ignored(&mut self) -> Result<()> {
        let top = self.tree.top();
        self.mark_dir(top, RuleSet::new())
    }

    fn mark_dir(&mut self, dir: DirId, mut rules: RuleSet) -> Result<()> {
        let located_in = self.tree.located_in().as_str().to_string();
        let files = self.tree.dir(dir).files.clone();

        for &id in &files {
            if is_rule_file(&self.tree.file(id).name) {
                self.tree.file_mut(id).is_ignored = true;
                rules.extend(load_rule_file(&self.tree.file_absolute_path(id))?);
            }
        }

        for &id in &files {
            let relative_path = self.tree.file_relative_path(id);
            let absolute_path = format!("{located_in}{relative_path}");
            let hit = rules.is_match(&Subject {
                name: &self.tree.file(id).name,
                relative_path: &relative_path,
                absolute_path: &absolute_path,
            });
            if hit {
                self.tree.file_mut(id).is_ignored = true;
            }
        }

        let subdirs = self.tree.dir(dir).dirs.clone();
        for &id in &subdirs {
            let relative_path = self.tree.relative_path(id).to_string();
            let absolute_path = format!("{located_in}{relative_path}");
            let hit = rules.is_match(&Subject {
                name: &self.tree.dir(id).name,
                relative_path: &relative_path,
                absolute_path: &absolute_path,
            });
            if hit {
                self.tree.dir_mut(id).is_ignored = true;
            }
        }

        for &id in &subdirs {
            if !self.tree.dir(id).is_ignored {
                self.mark_dir(id, rules.inherited())?;
            }
        }

        Ok(())
    }

    /// Archive the whole tree into `backup_root`, one container per
    /// directory. The destination must be missing or empty.
    pub fn compress(
        &self,
        engine: &Engine,
        backup_root: &Path,
        password: &str,
        strength: CipherStrength,
    ) -> Result<BatchOutcome> {
        let backup_root = QualifiedPath::from_path(backup_root)?;
        let destination = self.destination_in(&backup_root, self.top());
        info!(source = %self.root(), destination = %destination, %strength, "Compressing");
        ensure_empty_destination(&destination)?;

        write_marker(&backup_root, &self.top_node().name, &self.root())?;

        let dirs: Vec<DirId> = self.dirs().filter(|&id| !self.tree.is_excluded(id)).collect();
        for &dir in &dirs {
            let target = self.destination_in(&backup_root, dir);
            std::fs::create_dir_all(target.as_path())
                .map_err(|e| EngineError::fs(target.as_path(), e))?;
        }
        info!(dirs = dirs.len(), "Created directory tree");

        let outcome = run_parallel(
            engine,
            "Compressing",
            &dirs,
            |&dir| self.relative_path(dir).to_string(),
            |&dir| {
                let entries = self.pending_entries(dir);
                if entries.is_empty() {
                    return Ok(());
                }
                let target = self.destination_in(&backup_root, dir);
                archive::write_container(engine.codec(), &entries, target.as_path(), password, strength)
            },
        );

        engine.check_cancelled()?;
        Ok(outcome)
    }
}
