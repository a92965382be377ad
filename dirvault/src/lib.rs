//! dirvault library
//!
//! Incremental, encrypted, directory-granular backups: every directory of a
//! source tree becomes one AES-encrypted zip container holding its files,
//! and later runs only rewrite what changed.

pub mod archive;
pub mod config;
pub mod daemon;
pub mod diff;
pub mod engine;
pub mod executor;
pub mod fs;
pub mod job;
pub mod progress;
pub mod rules;
pub mod scan;
pub mod tree;
pub mod utils;
pub mod validate;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use archive::{ArchivedBackup, CipherStrength};
pub use config::Config;
pub use diff::BackupDiff;
pub use engine::Engine;
pub use job::{Job, JobReport};
pub use scan::{AnalyzedBackup, ScanMode};
pub use utils::errors::EngineError;
pub use utils::Result;
