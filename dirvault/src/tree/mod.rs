//! Arena tree of directory and file nodes.
//!
//! Nodes are addressed by index. A directory's parent is an index into the
//! same arena and only the top-most directory has none. Directories are
//! pushed in walk order (pre-order, children in name order), so index order
//! is walk order.

pub mod ids;

pub use ids::{IdGenerator, NodeId};

use crate::fs::{FileStat, QualifiedPath, SEPARATOR};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

impl DirId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl FileId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct DirNode {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<DirId>,
    pub dirs: Vec<DirId>,
    pub files: Vec<FileId>,
    /// Symlink, junction or mount point. Never enumerated.
    pub is_link: bool,
    pub is_ignored: bool,
    relative_path: OnceLock<String>,
}

#[derive(Debug, Clone)]
pub struct FileNode {
    pub id: NodeId,
    pub name: String,
    pub parent: DirId,
    pub stat: FileStat,
    pub is_ignored: bool,
}

impl FileNode {
    pub fn new(ids: &IdGenerator, parent: DirId, name: impl Into<String>, stat: FileStat) -> Self {
        Self {
            id: ids.next_id(),
            name: name.into(),
            parent,
            stat,
            is_ignored: false,
        }
    }
}

#[derive(Debug)]
pub struct Tree {
    located_in: QualifiedPath,
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
}

impl Tree {
    /// Start a tree whose top-most directory `top_name` lives in `located_in`.
    pub fn new(ids: &IdGenerator, located_in: QualifiedPath, top_name: &str) -> Self {
        let top = DirNode {
            id: ids.next_id(),
            name: top_name.to_string(),
            parent: None,
            dirs: Vec::new(),
            files: Vec::new(),
            is_link: false,
            is_ignored: false,
            relative_path: OnceLock::new(),
        };
        Self {
            located_in,
            dirs: vec![top],
            files: Vec::new(),
        }
    }

    pub fn top(&self) -> DirId {
        DirId(0)
    }

    /// The directory containing the top-most node
    pub fn located_in(&self) -> &QualifiedPath {
        &self.located_in
    }

    pub fn add_dir(&mut self, ids: &IdGenerator, parent: DirId, name: &str) -> DirId {
        let id = DirId(self.dirs.len());
        self.dirs.push(DirNode {
            id: ids.next_id(),
            name: name.to_string(),
            parent: Some(parent),
            dirs: Vec::new(),
            files: Vec::new(),
            is_link: false,
            is_ignored: false,
            relative_path: OnceLock::new(),
        });
        self.dirs[parent.0].dirs.push(id);
        id
    }

    pub fn add_file(&mut self, ids: &IdGenerator, parent: DirId, name: &str) -> FileId {
        let id = FileId(self.files.len());
        self.files
            .push(FileNode::new(ids, parent, name, FileStat::default()));
        self.dirs[parent.0].files.push(id);
        id
    }

    pub fn dir(&self, id: DirId) -> &DirNode {
        &self.dirs[id.0]
    }

    pub fn dir_mut(&mut self, id: DirId) -> &mut DirNode {
        &mut self.dirs[id.0]
    }

    pub fn file(&self, id: FileId) -> &FileNode {
        &self.files[id.0]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut FileNode {
        &mut self.files[id.0]
    }

    /// Every directory in walk order
    pub fn dir_ids(&self) -> impl Iterator<Item = DirId> + '_ {
        (0..self.dirs.len()).map(DirId)
    }

    /// Every file in walk order
    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        (0..self.files.len()).map(FileId)
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Files of `dir` that are not soft-ignored
    pub fn kept_files(&self, dir: DirId) -> impl Iterator<Item = &FileNode> + '_ {
        self.dirs[dir.0]
            .files
            .iter()
            .map(|id| &self.files[id.0])
            .filter(|file| !file.is_ignored)
    }

    /// Ignored itself or below an ignored directory. Soft marking does not
    /// descend into ignored directories, so their children keep the flag
    /// unset.
    pub fn is_excluded(&self, id: DirId) -> bool {
        let mut current = Some(id);
        while let Some(dir) = current {
            let node = &self.dirs[dir.0];
            if node.is_ignored {
                return true;
            }
            current = node.parent;
        }
        false
    }

    /// `top/child/.../name/`, computed once per directory.
    pub fn relative_path(&self, id: DirId) -> &str {
        relative_path_in(&self.dirs, id)
    }

    pub fn absolute_path(&self, id: DirId) -> QualifiedPath {
        self.located_in.join(self.relative_path(id))
    }

    pub fn file_relative_path(&self, id: FileId) -> String {
        let file = &self.files[id.0];
        format!("{}{}", self.relative_path(file.parent), file.name)
    }

    pub fn file_absolute_path(&self, id: FileId) -> PathBuf {
        PathBuf::from(format!("{}{}", self.located_in, self.file_relative_path(id)))
    }

    /// Fill size and timestamp of every file concurrently. Runs on the
    /// current rayon pool. A failed stat leaves the defaults in place.
    pub fn stat_files(&mut self) {
        let Tree {
            located_in,
            dirs,
            files,
        } = self;
        let located_in = &*located_in;
        let dirs: &[DirNode] = dirs;

        files.par_iter_mut().for_each(|file| {
            let path = format!(
                "{}{}{}",
                located_in,
                relative_path_in(dirs, file.parent),
                file.name
            );
            match FileStat::from_path(Path::new(&path)) {
                Ok(stat) => file.stat = stat,
                Err(e) => warn!(path = %path, error = %e, "Failed to read file metadata"),
            }
        });
    }
}

fn relative_path_in(dirs: &[DirNode], id: DirId) -> &str {
    let node = &dirs[id.0];
    node.relative_path.get_or_init(|| match node.parent {
        Some(parent) => format!(
            "{}{}{}",
            relative_path_in(dirs, parent),
            node.name,
            SEPARATOR
        ),
        None => format!("{}{}", node.name, SEPARATOR),
    })
}
