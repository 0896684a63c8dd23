//! The media-probe contract and the pure classification rule that turns a
//! probe result into a `SKIP`/`PENDING` disposition.
//!
//! The probe itself ("extracts codec, resolution, bitrate, and a content
//! hash from a file on disk") is named in `spec.md` §1 as an external
//! collaborator; `spacesaver-server` supplies the production
//! implementation that shells out to `ffprobe` (see `DESIGN.md`). This
//! module only owns the trait and the hashing helper shared by the
//! scanner and recovery/worker verification, plus the deterministic
//! classify rule.

use crate::types::{Category, MediaState, ProbeData};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Extracts codec, resolution, bitrate, duration, and a content hash from
/// a file on disk. The production implementation
/// (`spacesaver_server::probe::FfprobeProbe`) invokes the `ffprobe`
/// binary; tests use a canned fake.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> crate::error::Result<ProbeData>;
}

/// Streams `path` through SHA-256 in fixed-size chunks so memory use does
/// not scale with file size. Shared by every probe implementation and by
/// Recovery/Worker re-hash checks.
pub async fn content_hash(path: &Path) -> crate::error::Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Per-category classification thresholds, loaded from `BITRATE_FLOOR_*`
/// configuration (§6 environment table).
#[derive(Debug, Clone, Copy)]
pub struct ClassifyConfig {
    pub target_codec: &'static str,
    pub tv_bitrate_floor_bps: i64,
    pub movie_bitrate_floor_bps: i64,
}

impl ClassifyConfig {
    pub fn floor_for(&self, category: Category) -> i64 {
        match category {
            Category::Tv => self.tv_bitrate_floor_bps,
            Category::Movie => self.movie_bitrate_floor_bps,
        }
    }
}

/// Deterministically decides a `NEW` entry's initial disposition: `SKIP`
/// if the file is already in the target codec or its bitrate is below the
/// configured floor for its category, otherwise `PENDING`. See §4.1.
pub fn classify(probe: &ProbeData, category: Category, cfg: &ClassifyConfig) -> MediaState {
    if probe.codec.eq_ignore_ascii_case(cfg.target_codec) {
        return MediaState::Skip;
    }
    if probe.bitrate_bps < cfg.floor_for(category) {
        return MediaState::Skip;
    }
    MediaState::Pending
}
