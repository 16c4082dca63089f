//! DenKV Sender Error Types

use thiserror::Error;

/// Result type alias for sender operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the replication sender core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Argument and lookup errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // Binlog read outcomes
    #[error("End of binlog: {0}")]
    EndFile(String),

    #[error("Incomplete record: {0}")]
    Incomplete(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    // Encoding errors
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check whether this is the clean end-of-log condition
    pub fn is_end_file(&self) -> bool {
        matches!(self, Error::EndFile(_))
    }

    /// Check whether this is a truncated-record condition
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }

    /// Check whether this is a corruption condition
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Check whether this is a missing-entity condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
