use thiserror::Error;

use crate::AuditId;

/// Errors that can occur when interacting with the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// An entry with this id was already recorded. Entries are never
    /// overwritten.
    #[error("Audit entry already recorded: {0}")]
    DuplicateEntry(AuditId),

    /// The builder was finished without a required field.
    #[error("Audit entry is missing required field `{0}`")]
    MissingField(&'static str),

    /// A stored row carried a value this version does not understand.
    #[error("Unrecognised audit value in column {column}: {value:?}")]
    InvalidValue { column: &'static str, value: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for audit log operations.
pub type Result<T> = std::result::Result<T, AuditError>;
