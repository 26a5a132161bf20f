//! Defines the error types used throughout vellum.
use std::fmt;
use std::io;

/// The primary error enum for all fallible operations in vellum.
///
/// Missing keys are not errors: lookups report them as `None` and deletes as
/// `false`. Malformed snapshot records are skipped during a load and logged,
/// never surfaced.
#[derive(Debug, PartialEq, Eq)]
pub enum VellumError {
    /// An operation was handed a transaction descriptor that is no longer
    /// ACTIVE (already committed, aborted, or never registered). No mutation
    /// is performed when this is returned.
    TransactionNotActive,
    /// An underlying I/O error from the filesystem while dumping or loading
    /// a snapshot. A partially written dump file may exist afterwards.
    Io(String),
}

impl fmt::Display for VellumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VellumError::TransactionNotActive => {
                write!(f, "Transaction is not active")
            }
            VellumError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for VellumError {}

impl From<io::Error> for VellumError {
    fn from(err: io::Error) -> Self {
        VellumError::Io(err.to_string())
    }
}
