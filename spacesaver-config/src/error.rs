use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while assembling a [`crate::Config`].
/// Mirrors the teacher's `ferrex-config::loader::error::ConfigLoadError`
/// habit of one structured variant per failure mode rather than a single
/// stringly-typed error.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("{var} is required but was not set")]
    MissingVar { var: &'static str },

    #[error("{var} could not be parsed as {expected}: {value}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("MEDIA_DIRS entry {path:?} is not a valid <path>=<category> mapping")]
    InvalidMediaRoot { path: String },

    #[error("MEDIA_DIRS entry has unknown category {category:?}, expected 'tv' or 'movie'")]
    UnknownCategory { category: String },

    #[error("MEDIA_DIRS must name at least one root")]
    NoMediaRoots,

    #[error("media roots must be distinct, non-overlapping paths; {a:?} and {b:?} overlap")]
    OverlappingMediaRoots { a: PathBuf, b: PathBuf },

    #[error("{var} must be {constraint}, got {value}")]
    OutOfRange {
        var: &'static str,
        value: String,
        constraint: &'static str,
    },

    #[error("failed to load .env file at {path:?}: {source}")]
    DotenvIo {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}
