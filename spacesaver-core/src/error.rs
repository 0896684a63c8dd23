use thiserror::Error;

/// Errors surfaced by the catalog, recovery protocol, and scanner.
///
/// `InvariantViolation` is the one variant callers must not recover from:
/// it means the single-`IN_PROGRESS` discipline (or another catalog
/// invariant) was about to be broken, which indicates a programming error
/// upstream rather than an environmental failure.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("media probe failed for {path}: {reason}")]
    Probe { path: String, reason: String },

    #[error("entry {0} not found")]
    NotFound(uuid::Uuid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
