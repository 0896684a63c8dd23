//! The external encoder adapter (§4.4, §9 Design Notes "subprocess
//! management"). The core never links a codec library; every encode is a
//! separate `ffmpeg` process, tailed for progress and escalated through
//! `SIGTERM` then `SIGKILL` on cancellation, grounded in the teacher's
//! `stream::transcoding::worker::{run_ffmpeg_command, kill_process}`.

use crate::worker::progress::ProgressCell;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to spawn encoder: {0}")]
    Spawn(std::io::Error),
    #[error("encoder exited with status {code:?}: {stderr_tail}")]
    NonZeroExit { code: Option<i32>, stderr_tail: String },
    #[error("encode was cancelled")]
    Cancelled,
}

/// Parameters for one encode, derived from the entry's `category` per the
/// environment table in §6.
#[derive(Debug, Clone)]
pub struct EncodeParams {
    pub id: spacesaver_core::MediaId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub crf: u8,
    /// Maximum output resolution, long side, in pixels.
    pub res_cap: u32,
    /// Known source duration, used to turn `ffmpeg`'s `time=` progress
    /// reporting into a 0.0-1.0 fraction.
    pub source_duration_s: f64,
}

#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        params: &EncodeParams,
        progress: Arc<ProgressCell>,
        cancel: &CancellationToken,
    ) -> Result<(), EncodeError>;
}

/// Production encoder: spawns `ffmpeg`, targeting HEVC/MKV per §1.
pub struct ProcessEncoder {
    pub ffmpeg_path: String,
    pub grace_period: Duration,
}

impl ProcessEncoder {
    pub fn new(ffmpeg_path: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            grace_period,
        }
    }

    fn build_command(&self, params: &EncodeParams) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-y");
        cmd.arg("-i").arg(&params.input);
        cmd.arg("-map").arg("0");
        cmd.arg("-c:v").arg("libx265");
        cmd.arg("-crf").arg(params.crf.to_string());
        cmd.arg("-vf").arg(format!(
            "scale='min({cap},iw)':'min({cap},ih)':force_original_aspect_ratio=decrease",
            cap = params.res_cap
        ));
        cmd.arg("-c:a").arg("copy");
        cmd.arg("-c:s").arg("copy");
        cmd.arg(&params.output);
        cmd
    }
}

#[async_trait]
impl Encoder for ProcessEncoder {
    async fn encode(
        &self,
        params: &EncodeParams,
        progress: Arc<ProgressCell>,
        cancel: &CancellationToken,
    ) -> Result<(), EncodeError> {
        let mut cmd = self.build_command(params);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::piped());

        info!(id = %params.id, ?cmd, "starting encoder");
        let mut child = cmd.spawn().map_err(EncodeError::Spawn)?;
        let pid = child.id();

        let stderr_tail = Arc::new(parking_lot::Mutex::new(String::new()));
        let progress_handle = if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            let id = params.id;
            let duration = params.source_duration_s;
            Some(tokio::spawn(async move {
                tail_stderr(id, stderr, tail, duration, progress).await;
            }))
        } else {
            None
        };

        let status = tokio::select! {
            status = child.wait() => status.map_err(EncodeError::Spawn)?,
            _ = cancel.cancelled() => {
                warn!(id = %params.id, "encode cancelled, escalating signal");
                if let Some(handle) = progress_handle { handle.abort(); }
                terminate(pid, self.grace_period, &mut child).await;
                return Err(EncodeError::Cancelled);
            }
        };

        if let Some(handle) = progress_handle {
            handle.abort();
        }

        if status.success() {
            Ok(())
        } else {
            let tail = stderr_tail.lock().clone();
            Err(EncodeError::NonZeroExit {
                code: status.code(),
                stderr_tail: tail.lines().rev().take(10).collect::<Vec<_>>().join("\n"),
            })
        }
    }
}

async fn tail_stderr(
    id: spacesaver_core::MediaId,
    stderr: tokio::process::ChildStderr,
    tail: Arc<parking_lot::Mutex<String>>,
    duration_s: f64,
    progress: Arc<ProgressCell>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut t = tail.lock();
            t.push_str(&line);
            t.push('\n');
        }
        if let Some(current_s) = extract_time_seconds(&line) {
            if duration_s > 0.0 {
                let fraction = (current_s / duration_s).clamp(0.0, 1.0) as f32;
                progress.update_fraction(fraction);
                debug!(%id, fraction, "encode progress");
            }
        }
    }
}

/// Extracts `time=HH:MM:SS.ss` from one line of `ffmpeg` stderr.
fn extract_time_seconds(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let time_str = &rest[..end];
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `SIGTERM`, wait up to `grace_period`, then `SIGKILL` if still alive
/// (§5 "Cancellation"). Never leaves the process orphaned.
async fn terminate(pid: Option<u32>, grace_period: Duration, child: &mut tokio::process::Child) {
    let Some(pid) = pid else { return };
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, error = %err, "failed to send SIGTERM to encoder");
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(_) => info!(pid, "encoder exited after SIGTERM"),
        Err(_) => {
            warn!(pid, "encoder still alive after grace period, sending SIGKILL");
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                error!(pid, error = %err, "failed to send SIGKILL to encoder");
            }
            let _ = child.wait().await;
        }
    }
}

/// Test double: writes a synthetic output file (or fails), with no real
/// subprocess, exercising the worker's state transitions in isolation.
pub struct FakeEncoder {
    pub should_fail: bool,
    pub output_contents: Vec<u8>,
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(
        &self,
        params: &EncodeParams,
        progress: Arc<ProgressCell>,
        _cancel: &CancellationToken,
    ) -> Result<(), EncodeError> {
        progress.set(crate::worker::progress::EncodeProgress {
            id: params.id,
            path: params.input.display().to_string(),
            fraction: 0.0,
        });
        if self.should_fail {
            return Err(EncodeError::NonZeroExit {
                code: Some(1),
                stderr_tail: "synthetic failure".to_string(),
            });
        }
        tokio::fs::write(&params.output, &self.output_contents)
            .await
            .map_err(EncodeError::Spawn)?;
        progress.update_fraction(1.0);
        Ok(())
    }
}
