/// Error types for tidemark
///
/// Only conditions that abort an invocation live here. Skippable copy failures
/// end up in the backup manifest and best-effort failures are logged instead.
/// Uses thiserror for ergonomic error handling.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tidemark operations
#[derive(Error, Debug)]
pub enum TidemarkError {
    /// I/O errors (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The version directory could not be created at all
    #[error("Could not create backup directory {}: {source}", .path.display())]
    CreateVersionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every candidate version name was taken by a concurrent run
    #[error("Backup version collided {attempts} times in a row")]
    VersionCollision { attempts: u32 },

    /// The day's sequence numbers ran out
    #[error("No backup sequence numbers left for {date}")]
    SequenceExhausted { date: NaiveDate },

    /// The manifest could not be written, so the backup was discarded
    #[error("Could not write backup manifest {}: {source}", .path.display())]
    WriteManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Project structure could not be created
    #[error("Could not initialize {}: {source}", .path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed version identifier
    #[error("Invalid backup version: {0}")]
    InvalidVersion(String),

    /// No valid backup matches the request
    #[error("Backup not found: {0}")]
    BackupNotFound(String),
}

/// Result type alias for tidemark operations
pub type Result<T> = std::result::Result<T, TidemarkError>;

/// Convert TidemarkError to a user-friendly error message
impl TidemarkError {
    pub fn user_message(&self) -> String {
        match self {
            TidemarkError::Io(e) => {
                format!("File system error. Check permissions. Details: {}", e)
            }
            TidemarkError::Serialization(e) => {
                format!("Data format error: {}", e)
            }
            TidemarkError::Config(msg) => {
                format!("Configuration issue: {}", msg)
            }
            TidemarkError::CreateVersionDir { path, source } => format!(
                "Backup aborted: could not create {} ({}). Nothing was written.",
                path.display(),
                source
            ),
            TidemarkError::VersionCollision { attempts } => format!(
                "Backup aborted: another run kept claiming the same version ({} attempts). Try again.",
                attempts
            ),
            TidemarkError::SequenceExhausted { date } => format!(
                "Backup aborted: every version number for {} is used. Remove old backups for that day.",
                date
            ),
            TidemarkError::WriteManifest { path, source } => format!(
                "Backup aborted: could not write {} ({}). The partial backup was removed.",
                path.display(),
                source
            ),
            TidemarkError::Init { path, source } => {
                format!("Could not set up project structure at {}: {}", path.display(), source)
            }
            TidemarkError::InvalidVersion(v) => {
                format!("'{}' is not a backup version (expected YYYY-MM-DD_vN)", v)
            }
            TidemarkError::BackupNotFound(v) => {
                format!("No valid backup named '{}'", v)
            }
        }
    }
}
