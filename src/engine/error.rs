// src/engine/error.rs

use thiserror::Error;

use crate::store::StorageError;

/// Failure taxonomy of the attempt engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Missing attempt, test, question or section. Also returned when an attempt
    /// belongs to someone else, so existence is not leaked.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("an approved subscription is required for this test")]
    Entitlement,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
