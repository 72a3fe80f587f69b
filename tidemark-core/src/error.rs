//! Error types for Tidemark operations

use crate::{TemporalRange, Timestamp};
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
///
/// Any of these aborts the request that hit it. They are never retried here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to serialize payload: {reason}")]
    Serialization { reason: String },

    #[error("Failed to deserialize payload: {reason}")]
    Deserialization { reason: String },

    #[error("Corrupt key in {table}: {reason}")]
    CorruptKey { table: String, reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Upstream feed errors. Each one is scoped to a single requested window.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Feed request for {window} failed: {reason}")]
    RequestFailed {
        window: TemporalRange<Timestamp>,
        reason: String,
    },

    #[error("Feed request for {window} timed out after {after:?}")]
    TimedOut {
        window: TemporalRange<Timestamp>,
        after: Duration,
    },

    #[error("Feed for {window} disconnected before completing")]
    Disconnected { window: TemporalRange<Timestamp> },

    #[error("Feed receiver dropped")]
    ReceiverDropped,

    #[error("Partial fill: {} window(s) could not be fetched", .windows.len())]
    PartialFill {
        windows: Vec<TemporalRange<Timestamp>>,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid range for {field}: from {from} is after to {to}")]
    InvalidRange {
        field: String,
        from: String,
        to: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Illegal transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Tidemark errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TidemarkError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Tidemark operations.
pub type TidemarkResult<T> = Result<T, TidemarkError>;

impl ValidationError {
    /// Shorthand for a `from > to` violation on a named field.
    pub fn invalid_range<T: std::fmt::Display>(field: &str, from: T, to: T) -> Self {
        ValidationError::InvalidRange {
            field: field.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
