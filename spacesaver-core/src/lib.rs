//! Core library: the durable catalog, the crash-recovery protocol, the
//! library scanner, and the media-probe contract shared by everything
//! that needs to read a media file's codec, resolution, and content hash.
//!
//! `spacesaver-server` wires these pieces into a running service; this
//! crate has no knowledge of HTTP, the `ffmpeg`/`ffprobe` subprocesses, or
//! the worker loop that drives an encode to completion.

pub mod catalog;
pub mod error;
pub mod paths;
pub mod probe;
pub mod recovery;
pub mod scanner;
pub mod types;

pub use catalog::Catalog;
pub use error::{CoreError, Result};
pub use paths::{replacement_path, TARGET_CONTAINER_EXTENSION};
pub use probe::{ClassifyConfig, MediaProbe};
pub use recovery::{Recovery, RecoveryReport, SalvageConfig};
pub use scanner::{MediaRoot, ScanReport, Scanner, ScannerConfig};
pub use types::{Category, EntryFilter, MediaEntry, MediaId, MediaState, Outcome, ProbeData};
