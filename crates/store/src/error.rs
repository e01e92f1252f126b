//! Store operation errors.

use thiserror::Error;

use granary_core::DomainError;

/// Infrastructure-level store error.
///
/// These are storage/concurrency failures, as opposed to domain failures
/// (validation, invariants), which live in `granary_core::DomainError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A targeted document does not exist (e.g. patch/increment of a missing doc).
    #[error("document not found: {0}")]
    NotFound(String),

    /// A transaction's read footprint was invalidated and retries are exhausted.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A write was malformed (e.g. patching with a non-object, incrementing a
    /// non-numeric field, inserting over an existing id).
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// The store is unusable (e.g. a poisoned lock).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn doc(collection: &str, id: impl core::fmt::Display) -> String {
        format!("{collection}/{id}")
    }
}

/// Store failures surface to the domain layer without being swallowed:
/// missing documents map to `NotFound`, exhausted transaction retries map to
/// `Conflict`, and everything else is `Unavailable`.
impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => DomainError::NotFound,
            StoreError::Conflict(msg) => DomainError::conflict(msg),
            other => DomainError::unavailable(other.to_string()),
        }
    }
}
