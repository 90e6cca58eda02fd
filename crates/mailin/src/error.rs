//! Error types for the message store and pending queue

use std::fmt::Display;

/// Errors surfaced by the store, the index and the pending queue
///
/// `Storage`, `Io`, `Migration` and `Corrupt` all describe a failure of the
/// durable backing store; the other variants describe the request itself.
#[derive(Debug, thiserror::Error)]
pub enum MailinError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {message}")]
    Corrupt { message: String },
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MailinError>;

impl MailinError {
    pub fn not_found(resource: impl Display) -> Self {
        Self::NotFound {
            resource: resource.to_string(),
        }
    }

    pub fn conflict(message: impl Display) -> Self {
        Self::Conflict {
            message: message.to_string(),
        }
    }

    pub fn parse(message: impl Display) -> Self {
        Self::Parse {
            message: message.to_string(),
        }
    }

    pub fn corrupt(message: impl Display) -> Self {
        Self::Corrupt {
            message: message.to_string(),
        }
    }

    /// Map a failed INSERT, turning unique-constraint violations into `Conflict`
    pub(crate) fn from_insert(err: rusqlite::Error, what: impl Display) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                Self::conflict(format!("{} already exists", what))
            }
            _ => Self::Storage(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// True for failures of the underlying durable store
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Migration(_) | Self::Io(_) | Self::Corrupt { .. }
        )
    }
}
