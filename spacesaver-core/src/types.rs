//! The shared record types the catalog, recovery, and scanner operate on.
//!
//! Mirrors the teacher's habit (`ferrex-model::media_id`) of giving every
//! identity concept its own small newtype rather than passing bare `Uuid`s
//! and `String`s around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable opaque identifier for a [`MediaEntry`], assigned at first
/// insertion and never reused (invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(pub Uuid);

impl MediaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MediaId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Category derived from path prefix (configurable mapping), per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tv,
    Movie,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Tv => write!(f, "tv"),
            Category::Movie => write!(f, "movie"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tv" => Ok(Category::Tv),
            "movie" => Ok(Category::Movie),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// The lifecycle state of a [`MediaEntry`], per the §4.1 state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    New,
    Skip,
    Pending,
    Queued,
    InProgress,
    Done,
    Failed,
    Gone,
}

impl MediaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaState::New => "new",
            MediaState::Skip => "skip",
            MediaState::Pending => "pending",
            MediaState::Queued => "queued",
            MediaState::InProgress => "in_progress",
            MediaState::Done => "done",
            MediaState::Failed => "failed",
            MediaState::Gone => "gone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "new" => MediaState::New,
            "skip" => MediaState::Skip,
            "pending" => MediaState::Pending,
            "queued" => MediaState::Queued,
            "in_progress" => MediaState::InProgress,
            "done" => MediaState::Done,
            "failed" => MediaState::Failed,
            "gone" => MediaState::Gone,
            _ => return None,
        })
    }

    /// Terminal states per invariant 6; `Skip` is terminal until an
    /// explicit `enqueue` invalidates it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaState::Done | MediaState::Gone | MediaState::Skip)
    }
}

/// One catalog row describing one media file ever observed. See §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEntry {
    pub id: MediaId,
    pub path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub codec: String,
    pub width: i32,
    pub height: i32,
    pub bitrate_bps: i64,
    pub duration_s: f64,
    pub category: Category,
    pub state: MediaState,
    pub attempts: i32,
    pub last_error: String,
    pub workdir_path: String,
    pub pre_hash: String,
    /// mtime captured at the last full probe, so the scanner's cheap
    /// `(path, size, mtime)` check (§4.3 step 2) can skip re-hashing an
    /// unchanged file. Not itemized among the attributes spec.md lists
    /// explicitly, but required to implement that step faithfully.
    pub probed_mtime: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Probed metadata for a file on disk, produced by a [`crate::probe::MediaProbe`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeData {
    pub size_bytes: i64,
    pub mtime: DateTime<Utc>,
    pub content_hash: String,
    pub codec: String,
    pub width: i32,
    pub height: i32,
    pub bitrate_bps: i64,
    pub duration_s: f64,
}

/// The outcome the worker reports to [`crate::catalog::Catalog::finish`].
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Encode completed, verified, and the original was replaced.
    Done,
    /// Encoder failure or acceptance rejection; `reason` lands in `last_error`.
    Failed { reason: String },
    /// Source mutated mid-flight; not an error, entry returns to `PENDING`.
    SourceChanged,
}

/// A query filter for [`crate::catalog::Catalog::list`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub state: Option<MediaState>,
    pub category: Option<Category>,
}
