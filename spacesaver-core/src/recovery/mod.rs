//! The crash-recovery pass run once at startup, before the scanner or
//! worker are allowed to touch the catalog. See §4.2.
//!
//! Every entry left `QUEUED` or `IN_PROGRESS` by an unclean shutdown is
//! resolved to a state the rest of the system can rely on: the source
//! file might be gone, unchanged with a half-finished or finished
//! workdir file sitting next to it, or changed out from under the
//! in-flight encode. Grounded in the teacher's `ferrex-core::recovery`
//! reconciliation pass (startup-time sweep before the scan loop starts).

use crate::catalog::Catalog;
use crate::error::Result;
use crate::probe::MediaProbe;
use crate::scanner::fs::FileSystem;
use crate::types::MediaEntry;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Acceptance criteria for a workdir file, shared by the recovery salvage
/// path and the worker's verify-and-replace step (§4.2 step 3, §4.4 step
/// 4, glossary "Acceptance criteria"): it must probe as the target codec,
/// be strictly smaller than the source, and its duration must be close
/// enough to the source's that it is plausibly a complete encode rather
/// than a truncated one.
#[derive(Debug, Clone, Copy)]
pub struct SalvageConfig {
    pub target_codec: &'static str,
    pub duration_tolerance_s: f64,
}

impl SalvageConfig {
    pub fn is_acceptable(
        &self,
        encoded_duration_s: f64,
        encoded_codec: &str,
        encoded_size_bytes: i64,
        source_duration_s: f64,
        source_size_bytes: i64,
    ) -> bool {
        encoded_codec.eq_ignore_ascii_case(self.target_codec)
            && encoded_size_bytes < source_size_bytes
            && (encoded_duration_s - source_duration_s).abs() <= self.duration_tolerance_s
    }
}

/// Summary of one recovery pass.
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub total: usize,
    pub marked_gone: usize,
    pub salvaged: usize,
    pub discarded_workdir: usize,
    pub reset_to_pending: usize,
}

pub struct Recovery {
    fs: Arc<dyn FileSystem>,
    probe: Arc<dyn MediaProbe>,
    catalog: Catalog,
    salvage: SalvageConfig,
}

impl Recovery {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        probe: Arc<dyn MediaProbe>,
        catalog: Catalog,
        salvage: SalvageConfig,
    ) -> Self {
        Self {
            fs,
            probe,
            catalog,
            salvage,
        }
    }

    /// Runs the full recovery pass. Must complete before the scanner or
    /// worker start (invariant 5: at most one `IN_PROGRESS` entry, and
    /// recovery is what guarantees that's still true after a crash).
    pub async fn run_once(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let stale = self.catalog.list_non_terminal().await?;
        report.total = stale.len();

        for entry in stale {
            self.recover_entry(entry, &mut report).await?;
        }

        info!(
            total = report.total,
            marked_gone = report.marked_gone,
            salvaged = report.salvaged,
            discarded_workdir = report.discarded_workdir,
            reset_to_pending = report.reset_to_pending,
            "recovery pass complete"
        );
        Ok(report)
    }

    async fn recover_entry(&self, entry: MediaEntry, report: &mut RecoveryReport) -> Result<()> {
        let source_path = Path::new(&entry.path);

        if !self.fs.path_exists(source_path).await {
            self.catalog.mark_gone(entry.id).await?;
            report.marked_gone += 1;
            return Ok(());
        }

        let current_probe = match self.probe.probe(source_path).await {
            Ok(probe) => probe,
            Err(err) => {
                warn!(id = %entry.id, path = %entry.path, error = %err, "source unreadable during recovery, deferring to a future scan");
                self.discard_and_reset(&entry, report).await?;
                return Ok(());
            }
        };

        let source_changed = current_probe.content_hash != entry.pre_hash;
        let workdir_present = !entry.workdir_path.is_empty()
            && self.fs.path_exists(Path::new(&entry.workdir_path)).await;

        if source_changed {
            if workdir_present {
                let _ = self.fs.remove_file(Path::new(&entry.workdir_path)).await;
                report.discarded_workdir += 1;
            }
            self.catalog.reset_to_pending(entry.id).await?;
            report.reset_to_pending += 1;
            return Ok(());
        }

        if !workdir_present {
            self.catalog.reset_to_pending(entry.id).await?;
            report.reset_to_pending += 1;
            return Ok(());
        }

        let workdir_path = Path::new(&entry.workdir_path);
        let salvageable = match self.probe.probe(workdir_path).await {
            Ok(encoded) => self.salvage.is_acceptable(
                encoded.duration_s,
                &encoded.codec,
                encoded.size_bytes,
                entry.duration_s,
                entry.size_bytes,
            ),
            Err(_) => false,
        };

        if !salvageable {
            self.discard_and_reset(&entry, report).await?;
            return Ok(());
        }

        // As in the worker's own verify-and-replace step, the workdir file
        // is always `.mkv`; a source with a different extension gets the
        // salvaged output at a new path rather than an in-place overwrite
        // (§4.4 step 4).
        let target_path = crate::paths::replacement_path(source_path);
        match self.fs.rename(workdir_path, &target_path).await {
            Ok(()) => {
                if target_path.as_path() != source_path {
                    if let Err(err) = self.fs.remove_file(source_path).await {
                        warn!(id = %entry.id, path = %entry.path, error = %err, "failed to unlink stale original after salvage");
                    }
                    self.catalog
                        .move_entry_path(entry.id, &target_path.display().to_string())
                        .await?;
                }
                self.catalog.force_done(entry.id).await?;
                report.salvaged += 1;
                info!(id = %entry.id, path = %entry.path, "salvaged in-flight encode after restart");
            }
            Err(err) => {
                warn!(id = %entry.id, path = %entry.path, error = %err, "failed to replace source with salvaged encode");
                self.discard_and_reset(&entry, report).await?;
            }
        }
        Ok(())
    }

    async fn discard_and_reset(&self, entry: &MediaEntry, report: &mut RecoveryReport) -> Result<()> {
        if !entry.workdir_path.is_empty() {
            let _ = self.fs.remove_file(Path::new(&entry.workdir_path)).await;
            report.discarded_workdir += 1;
        }
        self.catalog.reset_to_pending(entry.id).await?;
        report.reset_to_pending += 1;
        Ok(())
    }
}
