//! The single long-lived encode loop (§4.4): claim, begin, encode, verify
//! and replace, or fail. No more than one encode runs at a time, matching
//! the teacher's background-task shape in
//! `stream::transcoding::worker::WorkerPool::worker_loop`, collapsed to a
//! single worker since invariant 5 forbids more than one `IN_PROGRESS`
//! entry regardless of how many workers existed.

pub mod progress;

use crate::encoder::{EncodeError, EncodeParams, Encoder};
use progress::{EncodeProgress, ProgressCell};
use spacesaver_config::{Config, MediaRootConfig};
use spacesaver_core::{
    Catalog, Category, MediaEntry, MediaProbe, Outcome, SalvageConfig,
};
use spacesaver_core::scanner::fs::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Periodic wakeup floor for the claim loop, independent of the catalog's
/// condition variable (§4.4 step 1: "a periodic wakeup as a floor").
const CLAIM_POLL_FLOOR: Duration = Duration::from_secs(30);

pub struct Worker {
    catalog: Catalog,
    fs: Arc<dyn FileSystem>,
    probe: Arc<dyn MediaProbe>,
    encoder: Arc<dyn Encoder>,
    config: Arc<Config>,
    progress: Arc<ProgressCell>,
}

impl Worker {
    pub fn new(
        catalog: Catalog,
        fs: Arc<dyn FileSystem>,
        probe: Arc<dyn MediaProbe>,
        encoder: Arc<dyn Encoder>,
        config: Arc<Config>,
        progress: Arc<ProgressCell>,
    ) -> Self {
        Self {
            catalog,
            fs,
            probe,
            encoder,
            config,
            progress,
        }
    }

    /// Runs until `cancel` fires. On cancellation, any in-flight entry is
    /// left `IN_PROGRESS` with its `workdir_path` intact; Recovery
    /// reconciles it on the next startup (§5 "Cancellation").
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                info!("worker stopping, no new claims");
                return;
            }

            let entry = tokio::select! {
                _ = cancel.cancelled() => return,
                claimed = self.claim_with_wait(&cancel) => match claimed {
                    Some(entry) => entry,
                    None => continue,
                },
            };

            if let Err(err) = self.process(entry, &cancel).await {
                if matches!(err, spacesaver_core::CoreError::InvariantViolation(_)) {
                    // §7: a second IN_PROGRESS entry indicates a programming
                    // error, not an environmental failure; do not try to
                    // carry on in a state we can no longer reason about.
                    error!(error = %err, "invariant violation, aborting process");
                    std::process::exit(1);
                }
                error!(error = %err, "worker iteration failed");
            }
            self.progress.clear();
        }
    }

    async fn claim_with_wait(&self, cancel: &CancellationToken) -> Option<MediaEntry> {
        match self.catalog.claim_next().await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    _ = self.catalog.wait_for_work(CLAIM_POLL_FLOOR) => None,
                }
            }
            Err(err) => {
                error!(error = %err, "claim_next failed, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
                None
            }
        }
    }

    async fn process(&self, entry: MediaEntry, cancel: &CancellationToken) -> spacesaver_core::Result<()> {
        let source_path = PathBuf::from(&entry.path);
        let workdir_path = self.workdir_path_for(&entry);

        self.catalog
            .begin(entry.id, &workdir_path.display().to_string())
            .await?;
        self.progress.set(EncodeProgress {
            id: entry.id,
            path: entry.path.clone(),
            fraction: 0.0,
        });

        let params = self.encode_params(&entry, &source_path, &workdir_path);
        let outcome = match self
            .encoder
            .encode(&params, self.progress.clone(), cancel)
            .await
        {
            Ok(()) => self.verify_and_replace(&entry, &source_path, &workdir_path).await,
            Err(EncodeError::Cancelled) => {
                info!(id = %entry.id, "encode cancelled mid-flight, leaving IN_PROGRESS for recovery");
                return Ok(());
            }
            Err(err) => {
                warn!(id = %entry.id, error = %err, "encoder failed");
                let _ = self.fs.remove_file(&workdir_path).await;
                Outcome::Failed { reason: err.to_string() }
            }
        };

        self.catalog.finish(entry.id, outcome).await
    }

    async fn verify_and_replace(
        &self,
        entry: &MediaEntry,
        source_path: &Path,
        workdir_path: &Path,
    ) -> Outcome {
        let current_probe = match self.probe.probe(source_path).await {
            Ok(probe) => probe,
            Err(err) => {
                warn!(id = %entry.id, error = %err, "source unreadable at verify time");
                let _ = self.fs.remove_file(workdir_path).await;
                return Outcome::Failed { reason: format!("source unreadable at verify: {err}") };
            }
        };

        if current_probe.content_hash != entry.pre_hash {
            info!(id = %entry.id, "source changed mid-encode, discarding output");
            let _ = self.fs.remove_file(workdir_path).await;
            return Outcome::SourceChanged;
        }

        let salvage = SalvageConfig {
            target_codec: self.config.target_codec,
            duration_tolerance_s: self.config.salvage_duration_tolerance_s,
        };
        let encoded_probe = match self.probe.probe(workdir_path).await {
            Ok(probe) => probe,
            Err(err) => {
                warn!(id = %entry.id, error = %err, "failed to probe encoder output");
                let _ = self.fs.remove_file(workdir_path).await;
                return Outcome::Failed { reason: format!("output unreadable: {err}") };
            }
        };

        let accepted = salvage.is_acceptable(
            encoded_probe.duration_s,
            &encoded_probe.codec,
            encoded_probe.size_bytes,
            entry.duration_s,
            entry.size_bytes,
        );
        if !accepted {
            warn!(id = %entry.id, "encoded output rejected by acceptance criteria");
            let _ = self.fs.remove_file(workdir_path).await;
            return Outcome::Failed { reason: "output-not-smaller".to_string() };
        }

        // The workdir file is always `.mkv`; when the source wasn't, the
        // encoded output lands at a new path with the target extension
        // instead of overwriting the mismatched original in place (§4.4
        // step 4).
        let target_path = spacesaver_core::replacement_path(source_path);
        match self.fs.rename(workdir_path, &target_path).await {
            Ok(()) => {
                if target_path.as_path() != source_path {
                    if let Err(err) = self.fs.remove_file(source_path).await {
                        warn!(id = %entry.id, path = %entry.path, error = %err, "failed to unlink stale original after replace");
                    }
                    if let Err(err) = self
                        .catalog
                        .move_entry_path(entry.id, &target_path.display().to_string())
                        .await
                    {
                        error!(id = %entry.id, error = %err, "failed to update catalog path after replace");
                        return Outcome::Failed { reason: format!("path update failed: {err}") };
                    }
                }
                info!(id = %entry.id, path = %target_path.display(), "replaced original with encoded output");
                Outcome::Done
            }
            Err(err) => {
                error!(id = %entry.id, error = %err, "failed to replace original with encoded output");
                Outcome::Failed { reason: format!("replace failed: {err}") }
            }
        }
    }

    /// Deterministic scratch path so Recovery can find it after a crash
    /// (§4.4 step 2, §6 persisted-state table: `workdir/<id>.mkv`).
    fn workdir_path_for(&self, entry: &MediaEntry) -> PathBuf {
        self.config.workdir.join(format!("{}.mkv", entry.id))
    }

    fn encode_params(&self, entry: &MediaEntry, source: &Path, output: &Path) -> EncodeParams {
        let (crf, res_cap) = match entry.category {
            Category::Tv => (self.config.tv_crf, self.config.tv_res_cap),
            Category::Movie => (self.config.movie_crf, self.config.movie_res_cap),
        };
        EncodeParams {
            id: entry.id,
            input: source.to_path_buf(),
            output: output.to_path_buf(),
            crf,
            res_cap,
            source_duration_s: entry.duration_s,
        }
    }
}

/// Derives the category assigned to a path from the configured media
/// roots (§3: "category derived from path prefix, configurable mapping").
pub fn category_for_path(roots: &[MediaRootConfig], path: &Path) -> Option<Category> {
    roots
        .iter()
        .find(|root| path.starts_with(&root.path))
        .map(|root| root.category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FakeEncoder;
    use async_trait::async_trait;
    use chrono::Utc;
    use spacesaver_core::scanner::fs::RealFs;
    use spacesaver_core::{MediaState, ProbeData};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    #[derive(Default, Clone)]
    struct FakeProbe {
        entries: Arc<parking_lot::Mutex<HashMap<PathBuf, ProbeData>>>,
    }

    impl FakeProbe {
        fn set(&self, path: impl Into<PathBuf>, probe: ProbeData) {
            self.entries.lock().insert(path.into(), probe);
        }
    }

    #[async_trait]
    impl MediaProbe for FakeProbe {
        async fn probe(&self, path: &Path) -> spacesaver_core::Result<ProbeData> {
            self.entries
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| spacesaver_core::CoreError::Probe {
                    path: path.display().to_string(),
                    reason: "no fake probe data registered".into(),
                })
        }
    }

    fn probe_data(codec: &str, size_bytes: i64, duration_s: f64, hash: &str) -> ProbeData {
        ProbeData {
            size_bytes,
            mtime: Utc::now(),
            content_hash: hash.into(),
            codec: codec.into(),
            width: 1920,
            height: 1080,
            bitrate_bps: 20_000_000,
            duration_s,
        }
    }

    fn test_config(workdir: PathBuf) -> Arc<Config> {
        Arc::new(Config {
            tv_crf: 28,
            movie_crf: 20,
            tv_res_cap: 1080,
            movie_res_cap: 2160,
            bitrate_floor_tv: 1_500_000,
            bitrate_floor_movie: 3_000_000,
            rescan_interval: Duration::from_secs(600),
            media_roots: vec![],
            workdir,
            salvage_duration_tolerance_s: 1.0,
            bind_addr: "127.0.0.1:0".to_string(),
            encoder_grace_period: Duration::from_secs(5),
            target_codec: "hevc",
        })
    }

    async fn open_catalog(dir: &Path) -> Catalog {
        Catalog::open(&dir.join("catalog.sqlite")).await.expect("open catalog")
    }

    /// The full §4.4 happy path: claim -> begin -> encode -> verify and
    /// replace -> finish(Done), ending with the source path holding the
    /// encoded bytes and the catalog entry `DONE`.
    #[tokio::test]
    async fn process_replaces_source_on_acceptable_output() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("movie.mkv");
        tokio::fs::write(&source_path, vec![0u8; 1000]).await.unwrap();

        let catalog = open_catalog(tmp.path()).await;
        let source_probe = probe_data("h264", 1000, 120.0, "source-hash");
        let (id, _) = catalog
            .upsert_by_path(&source_path.display().to_string(), Category::Movie, &source_probe)
            .await
            .unwrap();
        catalog.classify(id, MediaState::Pending).await.unwrap();
        let entry = catalog.claim_next().await.unwrap().unwrap();

        let probe = Arc::new(FakeProbe::default());
        probe.set(&source_path, source_probe.clone());

        let config = test_config(tmp.path().to_path_buf());
        let worker = Worker::new(
            catalog.clone(),
            Arc::new(RealFs::new()),
            probe.clone(),
            Arc::new(FakeEncoder {
                should_fail: false,
                output_contents: vec![1u8; 100],
            }),
            config.clone(),
            Arc::new(ProgressCell::new()),
        );

        let workdir_path = worker.workdir_path_for(&entry);
        probe.set(&workdir_path, probe_data("hevc", 100, 120.2, "encoded-hash"));

        worker.process(entry.clone(), &CancellationToken::new()).await.unwrap();

        let final_entry = catalog.get(id).await.unwrap();
        assert_eq!(final_entry.state, MediaState::Done);
        let replaced = tokio::fs::read(&source_path).await.unwrap();
        assert_eq!(replaced, vec![1u8; 100]);
        assert!(!tokio::fs::try_exists(&workdir_path).await.unwrap());
    }

    /// An encoder failure surfaces as `FAILED` with the reason recorded,
    /// and the half-written workdir file (if any) is discarded.
    #[tokio::test]
    async fn process_records_failure_when_encoder_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("movie.mkv");
        tokio::fs::write(&source_path, vec![0u8; 1000]).await.unwrap();

        let catalog = open_catalog(tmp.path()).await;
        let source_probe = probe_data("h264", 1000, 120.0, "source-hash");
        let (id, _) = catalog
            .upsert_by_path(&source_path.display().to_string(), Category::Movie, &source_probe)
            .await
            .unwrap();
        catalog.classify(id, MediaState::Pending).await.unwrap();
        let entry = catalog.claim_next().await.unwrap().unwrap();

        let probe = Arc::new(FakeProbe::default());
        probe.set(&source_path, source_probe);

        let config = test_config(tmp.path().to_path_buf());
        let worker = Worker::new(
            catalog.clone(),
            Arc::new(RealFs::new()),
            probe,
            Arc::new(FakeEncoder {
                should_fail: true,
                output_contents: vec![],
            }),
            config,
            Arc::new(ProgressCell::new()),
        );

        worker.process(entry, &CancellationToken::new()).await.unwrap();

        let final_entry = catalog.get(id).await.unwrap();
        assert_eq!(final_entry.state, MediaState::Failed);
        assert!(!final_entry.last_error.is_empty());
    }

    /// If the source mutates between claim and verify, the output is
    /// discarded and the entry returns to `PENDING` rather than `FAILED`
    /// (§4.4 step 4: not an error).
    #[tokio::test]
    async fn process_returns_to_pending_when_source_changes_mid_encode() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("movie.mkv");
        tokio::fs::write(&source_path, vec![0u8; 1000]).await.unwrap();

        let catalog = open_catalog(tmp.path()).await;
        let source_probe = probe_data("h264", 1000, 120.0, "source-hash");
        let (id, _) = catalog
            .upsert_by_path(&source_path.display().to_string(), Category::Movie, &source_probe)
            .await
            .unwrap();
        catalog.classify(id, MediaState::Pending).await.unwrap();
        let entry = catalog.claim_next().await.unwrap().unwrap();

        let probe = Arc::new(FakeProbe::default());
        // The source now probes differently than `pre_hash` captured at claim time.
        probe.set(&source_path, probe_data("h264", 1000, 120.0, "changed-hash"));

        let config = test_config(tmp.path().to_path_buf());
        let worker = Worker::new(
            catalog.clone(),
            Arc::new(RealFs::new()),
            probe.clone(),
            Arc::new(FakeEncoder {
                should_fail: false,
                output_contents: vec![1u8; 100],
            }),
            config,
            Arc::new(ProgressCell::new()),
        );
        let workdir_path = worker.workdir_path_for(&entry);
        probe.set(&workdir_path, probe_data("hevc", 100, 120.0, "encoded-hash"));

        worker.process(entry, &CancellationToken::new()).await.unwrap();

        let final_entry = catalog.get(id).await.unwrap();
        assert_eq!(final_entry.state, MediaState::Pending);
        assert!(!tokio::fs::try_exists(&workdir_path).await.unwrap());
    }

    /// Acceptance criteria reject an output that is not strictly smaller
    /// than the source, even with a matching codec and duration.
    #[tokio::test]
    async fn process_rejects_output_not_smaller_than_source() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("movie.mkv");
        tokio::fs::write(&source_path, vec![0u8; 1000]).await.unwrap();

        let catalog = open_catalog(tmp.path()).await;
        let source_probe = probe_data("h264", 1000, 120.0, "source-hash");
        let (id, _) = catalog
            .upsert_by_path(&source_path.display().to_string(), Category::Movie, &source_probe)
            .await
            .unwrap();
        catalog.classify(id, MediaState::Pending).await.unwrap();
        let entry = catalog.claim_next().await.unwrap().unwrap();

        let probe = Arc::new(FakeProbe::default());
        probe.set(&source_path, source_probe);

        let config = test_config(tmp.path().to_path_buf());
        let worker = Worker::new(
            catalog.clone(),
            Arc::new(RealFs::new()),
            probe.clone(),
            Arc::new(FakeEncoder {
                should_fail: false,
                output_contents: vec![1u8; 1200],
            }),
            config,
            Arc::new(ProgressCell::new()),
        );
        let workdir_path = worker.workdir_path_for(&entry);
        probe.set(&workdir_path, probe_data("hevc", 1200, 120.0, "encoded-hash"));

        worker.process(entry, &CancellationToken::new()).await.unwrap();

        let final_entry = catalog.get(id).await.unwrap();
        assert_eq!(final_entry.state, MediaState::Failed);
        assert_eq!(final_entry.last_error, "output-not-smaller");
    }

    /// A non-`.mkv` source ends up replaced at a new `.mkv`-suffixed path,
    /// with the stale original unlinked and the catalog entry repointed,
    /// rather than MKV-container bytes sitting under the old extension.
    #[tokio::test]
    async fn process_places_output_under_target_extension_when_source_differs() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("movie.mp4");
        tokio::fs::write(&source_path, vec![0u8; 1000]).await.unwrap();

        let catalog = open_catalog(tmp.path()).await;
        let source_probe = probe_data("h264", 1000, 120.0, "source-hash");
        let (id, _) = catalog
            .upsert_by_path(&source_path.display().to_string(), Category::Movie, &source_probe)
            .await
            .unwrap();
        catalog.classify(id, MediaState::Pending).await.unwrap();
        let entry = catalog.claim_next().await.unwrap().unwrap();

        let probe = Arc::new(FakeProbe::default());
        probe.set(&source_path, source_probe);

        let config = test_config(tmp.path().to_path_buf());
        let worker = Worker::new(
            catalog.clone(),
            Arc::new(RealFs::new()),
            probe.clone(),
            Arc::new(FakeEncoder {
                should_fail: false,
                output_contents: vec![1u8; 100],
            }),
            config,
            Arc::new(ProgressCell::new()),
        );
        let workdir_path = worker.workdir_path_for(&entry);
        probe.set(&workdir_path, probe_data("hevc", 100, 120.0, "encoded-hash"));

        worker.process(entry, &CancellationToken::new()).await.unwrap();

        let expected_path = tmp.path().join("movie.mkv");
        let final_entry = catalog.get(id).await.unwrap();
        assert_eq!(final_entry.state, MediaState::Done);
        assert_eq!(final_entry.path, expected_path.display().to_string());
        assert!(!tokio::fs::try_exists(&source_path).await.unwrap());
        assert!(tokio::fs::try_exists(&expected_path).await.unwrap());
    }
}
