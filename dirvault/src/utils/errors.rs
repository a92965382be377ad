//! Custom error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Fs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("Unrecognized match type '{0}', expected 'name', 'relative path' or 'absolute path'")]
    UnknownMatchTarget(String),

    #[error("Invalid AES key size {0}, expected '128' or '256'")]
    InvalidCipherStrength(u16),

    #[error("Invalid archive layout in {dir}: {reason}")]
    ArchiveLayout { dir: String, reason: String },

    #[error("Supplied password doesn't match the password of at least some of the files in the archive ({0})")]
    PasswordMismatch(String),

    #[error("The directory is not empty: {0}")]
    DestinationNotEmpty(String),

    #[error("Unsupported reparse point: {}", .0.display())]
    UnsupportedReparsePoint(PathBuf),

    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Attach the offending path to an I/O error.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Fs {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
