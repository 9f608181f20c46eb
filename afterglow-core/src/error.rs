//! Error types for the Afterglow core library.

use thiserror::Error;

/// Top-level error type for archive, storage and configuration operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The persistent store could not be opened or created.
    ///
    /// Callers continue in session-only mode when they see this.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A save was attempted without both required image blobs.
    #[error("Invalid memory payload: missing {missing} blob")]
    InvalidMemoryPayload {
        /// Which blob was missing (`thumb` or `render`).
        missing: &'static str,
    },

    /// A referenced asset key was not present in the store.
    #[error("Asset missing: {0}")]
    AssetMissing(String),

    /// A record carries a schema version this build does not read.
    #[error("Schema mismatch: record {id} has version {found}, expected {expected}")]
    SchemaMismatch {
        /// The record id.
        id: String,
        /// Version found on the record.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ArchiveError>;
