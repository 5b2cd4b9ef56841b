//! ABOUTME: Shared error type and the failure kinds reported per repository
//! ABOUTME: Every crate returns bw_core::Result

use serde::{Deserialize, Serialize};
use std::fmt;

/// Core error type for borgwatch
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Snapshot source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Store transaction failed: {0}")]
    StoreTransaction(String),

    #[error("Configuration missing for repository: {0}")]
    ConfigurationMissing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error for per-repository failure records
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::SourceUnavailable(_) | Error::Io(_) => FailureKind::SourceUnavailable,
            Error::MalformedSnapshot(_) | Error::Validation(_) => FailureKind::MalformedSnapshot,
            Error::StoreTransaction(_) | Error::Database(_) => FailureKind::StoreTransaction,
            Error::ConfigurationMissing(_) | Error::Config(_) | Error::NotFound(_) => {
                FailureKind::ConfigurationMissing
            }
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failure taxonomy recorded against a repository when a cycle unit fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceUnavailable,
    MalformedSnapshot,
    StoreTransaction,
    ConfigurationMissing,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::MalformedSnapshot => "malformed_snapshot",
            Self::StoreTransaction => "store_transaction",
            Self::ConfigurationMissing => "configuration_missing",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
