//! Error types for the site agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Site root not found: {0}")]
    RootNotFound(String),

    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    #[error("Path escapes the site root: {0}")]
    UnsafePath(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Corrupt bundle: {0}")]
    Bundle(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
