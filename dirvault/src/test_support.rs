//! Fixtures shared by the unit tests.

use crate::config::{Compression, Config};
use crate::engine::Engine;
use crate::fs::SEPARATOR;
use filetime::FileTime;
use std::path::Path;

pub const MTIME: i64 = 1_700_000_000;

pub fn config() -> Config {
    let mut config = Config::default();
    config.engine.worker_threads = 4;
    config.archive.compression = Compression::Stored;
    config
}

pub fn engine() -> Engine {
    Engine::new(&config()).unwrap()
}

/// Write a file below `root`, creating parents, with a fixed timestamp.
pub fn write(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(MTIME, 0)).unwrap();
}

pub fn mkdir(root: &Path, relative: &str) {
    std::fs::create_dir_all(root.join(relative)).unwrap();
}

/// `a/b` as a qualified relative path (`a/b/` with the platform separator)
pub fn rel(path: &str) -> String {
    path.split('/').map(|part| format!("{part}{SEPARATOR}")).collect()
}
