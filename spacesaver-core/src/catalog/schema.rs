//! Catalog DDL. Bump [`super::SCHEMA_VERSION`] whenever this changes in a
//! way that is not backward compatible with data written under an older
//! version.

pub const DDL: &str = "
CREATE TABLE media_entries (
    id            TEXT PRIMARY KEY,
    path          TEXT NOT NULL UNIQUE,
    content_hash  TEXT NOT NULL,
    size_bytes    INTEGER NOT NULL,
    codec         TEXT NOT NULL,
    width         INTEGER NOT NULL,
    height        INTEGER NOT NULL,
    bitrate_bps   INTEGER NOT NULL,
    duration_s    REAL NOT NULL,
    category      TEXT NOT NULL,
    state         TEXT NOT NULL,
    attempts      INTEGER NOT NULL DEFAULT 0,
    last_error    TEXT NOT NULL DEFAULT '',
    workdir_path  TEXT NOT NULL DEFAULT '',
    pre_hash      TEXT NOT NULL DEFAULT '',
    probed_mtime  TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE INDEX idx_media_entries_content_hash ON media_entries(content_hash);
CREATE INDEX idx_media_entries_state ON media_entries(state);
";
