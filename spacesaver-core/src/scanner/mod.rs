//! Walks the configured media roots and reconciles the filesystem with the
//! catalog. See §4.3.

pub mod fs;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::probe::{classify, ClassifyConfig, MediaProbe};
use crate::types::{Category, MediaState};
use fs::FileSystem;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// One configured media root and the category every file beneath it is
/// assigned (§3: "derived from path prefix, configurable mapping").
#[derive(Debug, Clone)]
pub struct MediaRoot {
    pub path: PathBuf,
    pub category: Category,
}

/// Scanner configuration: the roots to walk and the file extensions
/// considered media.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub roots: Vec<MediaRoot>,
    pub extensions: HashSet<String>,
}

impl ScannerConfig {
    fn is_media_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// Summary of one scan pass, surfaced to logs and (optionally) callers.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub files_walked: usize,
    pub refreshed: usize,
    pub inserted: usize,
    pub classified: usize,
    pub marked_gone: usize,
    pub deduplicated: usize,
}

/// Walks `roots`, reconciling catalog state with what is on disk. Each
/// file is its own transaction against the catalog (via [`Catalog`]'s own
/// per-call transactions), so an interrupted scan loses at most the
/// unprobed tail of the walk.
pub struct Scanner {
    fs: Arc<dyn FileSystem>,
    probe: Arc<dyn MediaProbe>,
    catalog: Catalog,
    config: ScannerConfig,
    classify_cfg: ClassifyConfig,
}

impl Scanner {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        probe: Arc<dyn MediaProbe>,
        catalog: Catalog,
        config: ScannerConfig,
        classify_cfg: ClassifyConfig,
    ) -> Self {
        Self {
            fs,
            probe,
            catalog,
            config,
            classify_cfg,
        }
    }

    /// Runs one full scan pass: enumerate, probe-or-skip, classify,
    /// de-duplicate, and mark vanished entries gone.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        for root in &self.config.roots {
            let files = self.walk(&root.path).await;
            for file_path in files {
                report.files_walked += 1;
                if let Err(err) = self.reconcile_file(&file_path, root.category, &mut report).await
                {
                    warn!(path = %file_path.display(), error = %err, "failed to reconcile file during scan");
                }
            }
        }

        self.mark_vanished(&mut report).await?;
        self.deduplicate(&mut report).await?;

        info!(
            files_walked = report.files_walked,
            inserted = report.inserted,
            refreshed = report.refreshed,
            classified = report.classified,
            marked_gone = report.marked_gone,
            deduplicated = report.deduplicated,
            "scan pass complete"
        );
        Ok(report)
    }

    async fn reconcile_file(
        &self,
        file_path: &Path,
        category: Category,
        report: &mut ScanReport,
    ) -> Result<()> {
        let path_str = file_path.to_string_lossy().to_string();
        let meta = match self.fs.metadata(file_path).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path_str, error = %err, "could not stat file, skipping this pass");
                return Ok(());
            }
        };

        let existing_at_path = self.catalog.get_by_path(&path_str).await?;
        if let Some(existing) = &existing_at_path {
            let unchanged = existing.size_bytes as u64 == meta.len
                && meta
                    .modified
                    .map(|m| {
                        chrono::DateTime::<chrono::Utc>::from(m) == existing.probed_mtime
                    })
                    .unwrap_or(false);
            if unchanged {
                return Ok(());
            }
        }

        let probe_data = self.probe.probe(file_path).await?;

        // A live entry elsewhere sharing this content hash, whose old path
        // no longer exists on disk, is this same file having been renamed
        // or relocated rather than a genuine duplicate. S4 requires both
        // rows to survive as long as both paths are still present on disk,
        // so the scanner only folds them here when the old path is gone;
        // otherwise a fresh row is inserted and left for `deduplicate` to
        // collapse.
        let moved_from = if existing_at_path.is_none() {
            match self
                .catalog
                .find_live_by_content_hash(&probe_data.content_hash)
                .await?
            {
                Some(candidate)
                    if candidate.path != path_str
                        && !self.fs.path_exists(Path::new(&candidate.path)).await =>
                {
                    Some(candidate.id)
                }
                _ => None,
            }
        } else {
            None
        };

        let id = if let Some(candidate_id) = moved_from {
            self.catalog.move_entry_path(candidate_id, &path_str).await?;
            report.refreshed += 1;
            candidate_id
        } else {
            let (id, inserted) = self
                .catalog
                .upsert_by_path(&path_str, category, &probe_data)
                .await?;
            if inserted {
                report.inserted += 1;
            } else {
                report.refreshed += 1;
            }
            id
        };

        let current = self.catalog.get(id).await?;
        if current.state == MediaState::New {
            let new_state = classify(&probe_data, category, &self.classify_cfg);
            self.catalog.classify(id, new_state).await?;
            report.classified += 1;
        }
        Ok(())
    }

    async fn mark_vanished(&self, report: &mut ScanReport) -> Result<()> {
        for entry in self.catalog.list_live().await? {
            if matches!(
                entry.state,
                MediaState::Done | MediaState::Gone | MediaState::Skip
            ) {
                continue;
            }
            if !self.fs.path_exists(Path::new(&entry.path)).await {
                self.catalog.mark_gone(entry.id).await?;
                report.marked_gone += 1;
            }
        }
        Ok(())
    }

    /// If two live entries share a `content_hash`, the one with the
    /// lexicographically later `path` is removed from disk and its entry
    /// marked `GONE`. Deduplication defers while either entry is
    /// `IN_PROGRESS`.
    async fn deduplicate(&self, report: &mut ScanReport) -> Result<()> {
        let live = self.catalog.list_live().await?;
        let mut by_hash: std::collections::HashMap<String, Vec<_>> = std::collections::HashMap::new();
        for entry in live {
            by_hash.entry(entry.content_hash.clone()).or_default().push(entry);
        }

        for (_, mut group) in by_hash {
            if group.len() < 2 {
                continue;
            }
            if group.iter().any(|e| e.state == MediaState::InProgress) {
                continue;
            }
            group.sort_by(|a, b| a.path.cmp(&b.path));
            for loser in &group[1..] {
                if let Err(err) = self.fs.remove_file(Path::new(&loser.path)).await {
                    warn!(path = %loser.path, error = %err, "failed to remove duplicate file");
                    continue;
                }
                self.catalog.mark_gone(loser.id).await?;
                report.deduplicated += 1;
            }
        }
        Ok(())
    }

    async fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(root.to_path_buf());

        while let Some(dir) = queue.pop_front() {
            let mut entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %dir.display(), error = %err, "failed to read directory during scan");
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(path)) => match self.fs.metadata(&path).await {
                        Ok(meta) if meta.is_dir => queue.push_back(path),
                        Ok(meta) if meta.is_file && self.config.is_media_file(&path) => {
                            out.push(path)
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "failed to stat directory entry");
                        }
                    },
                    Ok(None) => break,
                    Err(err) => {
                        warn!(path = %dir.display(), error = %err, "failed to iterate directory");
                        break;
                    }
                }
            }
        }
        out
    }
}
