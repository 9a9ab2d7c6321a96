use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    // Ledger errors
    #[error("Ledger database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Ledger migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Import ledger at {path} is unreadable or corrupt: {reason}")]
    CorruptLedger { path: PathBuf, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Filesystem errors
    #[error("Input directory is not readable: {0}")]
    InputNotReadable(PathBuf),

    #[error("Output directory {path} is not writable: {reason}")]
    OutputNotWritable { path: PathBuf, reason: String },

    // Metadata errors
    #[error("Exiftool error: {0}")]
    Exiftool(String),

    #[error("Date parsing error: {0}")]
    InvalidDateFormat(String),

    // User errors
    #[error("Argument error: {0}")]
    Argument(String),
}

impl TriageError {
    /// Wrap any failure to open an existing ledger store as corruption.
    pub fn corrupt_ledger(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TriageError::CorruptLedger {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Details about files that failed to copy.
#[derive(Debug)]
pub struct CopyFailures {
    pub failures: Vec<CopyFailure>,
}

#[derive(Debug)]
pub struct CopyFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub error: std::io::Error,
}

impl std::fmt::Display for CopyFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} files failed to copy", self.failures.len())
    }
}

impl CopyFailures {
    pub fn new() -> Self {
        Self { failures: Vec::new() }
    }

    pub fn add(&mut self, source: PathBuf, destination: PathBuf, error: std::io::Error) {
        self.failures.push(CopyFailure {
            source,
            destination,
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }
}

impl Default for CopyFailures {
    fn default() -> Self {
        Self::new()
    }
}

/// Which stage of the pipeline a recoverable failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Scan,
    Copy,
    Record,
}

impl std::fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailurePhase::Scan => "scan",
            FailurePhase::Copy => "copy",
            FailurePhase::Record => "record",
        };
        write!(f, "{}", s)
    }
}

/// A per-file or per-item failure that did not stop the run.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub phase: FailurePhase,
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.path.display(), self.message)
    }
}

/// Result type for omtriage operations.
pub type Result<T> = std::result::Result<T, TriageError>;
