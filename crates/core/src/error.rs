//! Error types for Jellyfish
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Every variant is a distinct discriminant so callers can branch on
//! [`Error::kind`] without matching on message strings.

use crate::bucket::Bucket;
use thiserror::Error;

/// Result type alias for Jellyfish operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Jellyfish
#[derive(Debug, Error)]
pub enum Error {
    /// Generic backing-store failure
    #[error("Database error: {0}")]
    Database(String),

    /// Neither a slug nor an id could be determined for a write
    #[error("Missing primary key: {0}")]
    MissingPrimaryKey(String),

    /// A write was attempted without a `type`
    #[error("Missing element type")]
    MissingType,

    /// Uniqueness violation on insert (or a cross-bucket slug collision)
    #[error("Element already exists in {bucket}: {key}")]
    ElementAlreadyExists {
        /// Bucket holding the conflicting element
        bucket: Bucket,
        /// The conflicting slug or id
        key: String,
    },

    /// Slug exceeds the length limit or contains forbidden characters
    #[error("Invalid slug: {0}")]
    InvalidSlug(String),

    /// Limit is negative, infinite, NaN, or non-integral
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// Skip is negative, infinite, NaN, or non-integral
    #[error("Invalid skip: {0}")]
    InvalidSkip(String),

    /// Query schema uses a keyword incorrectly (e.g. a bad `pattern`)
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Unrecognized link name during evaluation
    #[error("Unknown link type: {0}")]
    UnknownLinkType(String),

    /// Formula failed to parse or evaluated to undefined
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// Operation on a change stream that has already emitted `Closed`
    #[error("Stream closed")]
    StreamClosed,

    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Copyable discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Database`]
    Database,
    /// See [`Error::MissingPrimaryKey`]
    MissingPrimaryKey,
    /// See [`Error::MissingType`]
    MissingType,
    /// See [`Error::ElementAlreadyExists`]
    ElementAlreadyExists,
    /// See [`Error::InvalidSlug`]
    InvalidSlug,
    /// See [`Error::InvalidLimit`]
    InvalidLimit,
    /// See [`Error::InvalidSkip`]
    InvalidSkip,
    /// See [`Error::InvalidSchema`]
    InvalidSchema,
    /// See [`Error::UnknownLinkType`]
    UnknownLinkType,
    /// See [`Error::InvalidExpression`]
    InvalidExpression,
    /// See [`Error::StreamClosed`]
    StreamClosed,
    /// See [`Error::Config`]
    Config,
    /// See [`Error::Serialization`]
    Serialization,
}

impl Error {
    /// Shorthand for [`Error::Database`]
    pub fn database(msg: impl Into<String>) -> Self {
        Error::Database(msg.into())
    }

    /// Shorthand for [`Error::InvalidExpression`]
    pub fn invalid_expression(msg: impl Into<String>) -> Self {
        Error::InvalidExpression(msg.into())
    }

    /// Shorthand for [`Error::InvalidSchema`]
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Error::InvalidSchema(msg.into())
    }

    /// The discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(_) => ErrorKind::Database,
            Error::MissingPrimaryKey(_) => ErrorKind::MissingPrimaryKey,
            Error::MissingType => ErrorKind::MissingType,
            Error::ElementAlreadyExists { .. } => ErrorKind::ElementAlreadyExists,
            Error::InvalidSlug(_) => ErrorKind::InvalidSlug,
            Error::InvalidLimit(_) => ErrorKind::InvalidLimit,
            Error::InvalidSkip(_) => ErrorKind::InvalidSkip,
            Error::InvalidSchema(_) => ErrorKind::InvalidSchema,
            Error::UnknownLinkType(_) => ErrorKind::UnknownLinkType,
            Error::InvalidExpression(_) => ErrorKind::InvalidExpression,
            Error::StreamClosed => ErrorKind::StreamClosed,
            Error::Config(_) => ErrorKind::Config,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether retrying the identical call could succeed.
    ///
    /// Only transient backing-store failures qualify. Retry policy itself
    /// belongs to the caller; nothing in Jellyfish retries automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(_))
    }
}
