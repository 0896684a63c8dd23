//! Production [`MediaProbe`] implementation: shells out to `ffprobe`
//! (never a linked decoder, per §4.4) and pairs its JSON output with the
//! independently streamed content hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use spacesaver_core::error::{CoreError, Result};
use spacesaver_core::probe::content_hash;
use spacesaver_core::{MediaProbe, ProbeData};
use std::path::Path;
use tokio::process::Command;

pub struct FfprobeProbe {
    pub ffprobe_path: String,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<ProbeData> {
        let metadata = tokio::fs::metadata(path).await?;
        let mtime: DateTime<Utc> = metadata.modified()?.into();

        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("stream=codec_type,codec_name,width,height")
            .arg("-show_entries")
            .arg("format=duration,bit_rate")
            .arg("-of")
            .arg("json")
            .arg(path)
            .output()
            .await
            .map_err(|e| CoreError::Probe {
                path: path.display().to_string(),
                reason: format!("failed to spawn ffprobe: {e}"),
            })?;

        if !output.status.success() {
            return Err(CoreError::Probe {
                path: path.display().to_string(),
                reason: format!(
                    "ffprobe exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
            CoreError::Probe {
                path: path.display().to_string(),
                reason: format!("failed to parse ffprobe output: {e}"),
            }
        })?;

        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| CoreError::Probe {
                path: path.display().to_string(),
                reason: "no video stream found".to_string(),
            })?;

        let codec = video.codec_name.clone().unwrap_or_default();
        let width = video.width.unwrap_or(0);
        let height = video.height.unwrap_or(0);
        let duration_s: f64 = parsed
            .format
            .duration
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let bitrate_bps: i64 = parsed
            .format
            .bit_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let hash = content_hash(path).await?;

        Ok(ProbeData {
            size_bytes: metadata.len() as i64,
            mtime,
            content_hash: hash,
            codec,
            width,
            height,
            bitrate_bps,
            duration_s,
        })
    }
}
