//! Error type shared by every store and workflow in the crate.

use thiserror::Error;

/// Errors surfaced by store operations.
///
/// `Validation` carries the user-facing message for a rejected form field;
/// everything else is a lookup, state or storage failure.
#[derive(Debug, Error)]
pub enum PosError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many failed attempts. Try again in {minutes} minute(s).")]
    LockedOut { minutes: i64 },

    #[error("PIN hashing failed: {0}")]
    PinHash(#[from] bcrypt::BcryptError),

    #[error("database lock poisoned")]
    Lock,
}

pub type PosResult<T> = Result<T, PosError>;

impl PosError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PosError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Lock
    }
}
