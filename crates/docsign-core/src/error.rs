//! Error types for the package workflow engine

use thiserror::Error;

use crate::model::PackageStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),

    #[error("package is {status}")]
    InvalidState { status: PackageStatus },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("verification code is invalid or expired")]
    OtpInvalidOrExpired,

    #[error("too many incorrect verification attempts, request a new code")]
    OtpAttemptsExceeded,

    #[error("incorrect verification code, {remaining} attempts remaining")]
    OtpIncorrect { remaining: u32 },

    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },

    #[error("already completed fields cannot be reassigned: {}", .fields.join(", "))]
    AlreadyCompleted { fields: Vec<String> },

    #[error("package was modified concurrently (expected version {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub(crate) fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {} not found", kind, id))
    }

    pub(crate) fn participant_not_found() -> Self {
        Self::NotFound("not a valid participant".to_string())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub(crate) fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
