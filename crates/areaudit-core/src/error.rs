//! Error types for areaudit.
//!
//! Claim conflicts and failed predicates are NOT errors; they are part of
//! normal solver control flow and never appear here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    /// Malformed specification: unknown key, bad operator, unresolved
    /// requirement reference. Fatal to the audit; carries the offending path.
    #[error("specification error at {path}: {message}")]
    Specification { path: String, message: String },

    /// Bad transcript data: missing required field, unparseable grade.
    #[error("data error: {0}")]
    Data(String),

    /// Internal invariant violation (rank > max_rank, ledger inconsistency).
    /// Bug-class; aborts the audit and names the node where it broke.
    #[error("invariant violation at {path}: {message}")]
    Invariant { path: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl AuditError {
    pub fn specification(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Specification {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn invariant(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Invariant {
            path: path.to_string(),
            message: message.into(),
        }
    }
}
