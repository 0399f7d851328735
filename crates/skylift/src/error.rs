use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkyliftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Disposition error: {0}")]
    Disposition(#[from] DispositionError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read seed file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse seed file JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Watcher for source '{0}' is already running")]
    AlreadyStarted(String),

    #[error("Watch folder does not exist or is not a directory: {0}")]
    FolderMissing(PathBuf),

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Watch error: {0}")]
    WatchError(String),

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("File exceeds size limit ({size_bytes} bytes > {limit_bytes} bytes): {path}")]
    FileTooLarge {
        path: PathBuf,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Upload outcomes the processor can distinguish. Transient errors are
/// retried with backoff; permanent ones fail the job immediately.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Transient upload failure: {0}")]
    Transient(String),

    #[error("Permanent upload failure: {0}")]
    Permanent(String),
}

impl UploadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum DispositionError {
    #[error("Failed to delete '{path}': {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SkyliftError>;
