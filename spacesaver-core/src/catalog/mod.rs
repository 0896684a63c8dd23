//! The durable, single-writer catalog: the single source of truth for every
//! [`MediaEntry`] ever observed.
//!
//! Grounded in the teacher's `ferrex-core::database::postgres::PostgresDatabase`
//! (pool bootstrap, `Debug` impl showing pool stats) and
//! `ferrex-core::catalog::mod` (the facade-module idea), but built on
//! `sqlx`'s `sqlite` feature instead of `postgres`: the spec calls for a
//! single-writer embedded store, which a networked database is the wrong
//! shape for. See `DESIGN.md` for the full rationale.

mod schema;

use crate::error::{CoreError, Result};
use crate::types::{Category, EntryFilter, MediaEntry, MediaId, MediaState, Outcome};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// The schema version this build expects. Bumped whenever `schema::DDL`
/// changes in an incompatible way.
const SCHEMA_VERSION: i64 = 1;

/// Handle to the durable catalog. Cheap to clone: internally an `sqlx`
/// connection pool plus a [`Notify`] used to wake idle waiters (the
/// "condition variable woken by catalog inserts/enqueues" of §5).
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
    ready: Arc<Notify>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl Catalog {
    /// Opens (or creates) the catalog at `path`. Runs the validity check
    /// from §4.1: if the store is corrupt or at an incompatible schema
    /// version it is discarded and recreated empty.
    pub async fn open(path: &Path) -> Result<Self> {
        match Self::open_existing(path).await {
            Ok(catalog) => Ok(catalog),
            Err(err) => {
                warn!(
                    ?path,
                    error = %err,
                    "catalog failed validity check, recreating empty"
                );
                if path.exists() {
                    let _ = tokio::fs::remove_file(path).await;
                }
                for suffix in ["-wal", "-shm"] {
                    let sidecar = format!("{}{}", path.display(), suffix);
                    let _ = tokio::fs::remove_file(sidecar).await;
                }
                Self::open_existing(path).await
            }
        }
    }

    async fn open_existing(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.display()
        ))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let integrity: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;
        if integrity != "ok" {
            return Err(CoreError::Database(sqlx::Error::Protocol(format!(
                "integrity check failed: {integrity}"
            ))));
        }

        let user_version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;
        if user_version == 0 {
            sqlx::query(schema::DDL).execute(&pool).await?;
            sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
                .execute(&pool)
                .await?;
            info!(?path, "initialized new catalog");
        } else if user_version != SCHEMA_VERSION {
            return Err(CoreError::Database(sqlx::Error::Protocol(format!(
                "incompatible schema version {user_version}, expected {SCHEMA_VERSION}"
            ))));
        }

        Ok(Self {
            pool,
            ready: Arc::new(Notify::new()),
        })
    }

    /// Waits until a mutation that might make a `PENDING` entry available
    /// has happened, or `timeout` elapses (the "periodic wakeup as a
    /// floor" from §4.4 step 1).
    pub async fn wait_for_work(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.ready.notified()).await;
    }

    fn wake_waiters(&self) {
        self.ready.notify_waiters();
    }

    /// Inserts a new entry or refreshes an existing one by path, per §4.1.
    /// Returns the entry's id and whether it was newly inserted.
    ///
    /// Does *not* look across paths by content hash: two live entries can
    /// legitimately share a `content_hash` (S4 keeps both rows until the
    /// scanner's deduplication pass collapses them). Callers that need to
    /// recognize a rename/move rather than minting a fresh row use
    /// [`Catalog::find_live_by_content_hash`] and
    /// [`Catalog::move_entry_path`] first.
    pub async fn upsert_by_path(
        &self,
        path: &str,
        category: Category,
        probe: &crate::types::ProbeData,
    ) -> Result<(MediaId, bool)> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        if let Some(row) = sqlx::query("SELECT id FROM media_entries WHERE path = ?1")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?
        {
            let id: String = row.try_get("id")?;
            sqlx::query(
                "UPDATE media_entries SET content_hash = ?1, size_bytes = ?2, codec = ?3, \
                 width = ?4, height = ?5, bitrate_bps = ?6, duration_s = ?7, probed_mtime = ?8, \
                 updated_at = ?9 WHERE id = ?10",
            )
            .bind(&probe.content_hash)
            .bind(probe.size_bytes)
            .bind(&probe.codec)
            .bind(probe.width)
            .bind(probe.height)
            .bind(probe.bitrate_bps)
            .bind(probe.duration_s)
            .bind(probe.mtime.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(&id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            let media_id = MediaId::from(uuid::Uuid::parse_str(&id).map_err(|e| {
                CoreError::Database(sqlx::Error::Decode(Box::new(e)))
            })?);
            return Ok((media_id, false));
        }

        let id = MediaId::new();
        sqlx::query(
            "INSERT INTO media_entries \
             (id, path, content_hash, size_bytes, codec, width, height, bitrate_bps, \
              duration_s, category, state, attempts, last_error, workdir_path, pre_hash, \
              probed_mtime, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'new', 0, '', '', '', ?11, ?12)",
        )
        .bind(id.to_string())
        .bind(path)
        .bind(&probe.content_hash)
        .bind(probe.size_bytes)
        .bind(&probe.codec)
        .bind(probe.width)
        .bind(probe.height)
        .bind(probe.bitrate_bps)
        .bind(probe.duration_s)
        .bind(category.to_string())
        .bind(probe.mtime.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.wake_waiters();
        Ok((id, true))
    }

    /// Transitions a `NEW` entry to `new_state` (`SKIP` or `PENDING`), the
    /// disposition decided by [`crate::probe::classify`].
    pub async fn classify(&self, id: MediaId, new_state: MediaState) -> Result<()> {
        let result = sqlx::query(
            "UPDATE media_entries SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = 'new'",
        )
        .bind(new_state.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!(
                "entry {id} is not in state NEW"
            )));
        }
        if new_state == MediaState::Pending {
            self.wake_waiters();
        }
        Ok(())
    }

    /// Atomically selects the best `PENDING` entry (largest `size_bytes`,
    /// then oldest `updated_at`) and transitions it to `QUEUED`, recording
    /// `pre_hash`. Returns `None` if nothing is ready or if any entry is
    /// already `IN_PROGRESS` (invariant 5).
    pub async fn claim_next(&self) -> Result<Option<MediaEntry>> {
        let mut tx = self.pool.begin().await?;

        let in_progress: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM media_entries WHERE state = 'in_progress'")
                .fetch_one(&mut *tx)
                .await?;
        if in_progress > 0 {
            return Ok(None);
        }

        let Some(row) = sqlx::query(
            "SELECT * FROM media_entries WHERE state = 'pending' \
             ORDER BY size_bytes DESC, updated_at ASC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let entry = row_to_entry(&row)?;
        sqlx::query(
            "UPDATE media_entries SET state = 'queued', pre_hash = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(&entry.content_hash)
        .bind(Utc::now().to_rfc3339())
        .bind(entry.id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(MediaEntry {
            state: MediaState::Queued,
            pre_hash: entry.content_hash.clone(),
            ..entry
        }))
    }

    /// Transitions `QUEUED -> IN_PROGRESS`. Fails if invariant 5 would be
    /// violated (another entry is already `IN_PROGRESS`).
    pub async fn begin(&self, id: MediaId, workdir_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let in_progress: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM media_entries WHERE state = 'in_progress'")
                .fetch_one(&mut *tx)
                .await?;
        if in_progress > 0 {
            return Err(CoreError::InvariantViolation(
                "attempted to begin a second IN_PROGRESS entry".into(),
            ));
        }

        let result = sqlx::query(
            "UPDATE media_entries SET state = 'in_progress', workdir_path = ?1, \
             attempts = attempts + 1, updated_at = ?2 WHERE id = ?3 AND state = 'queued'",
        )
        .bind(workdir_path)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!("entry {id} is not QUEUED")));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Transitions `IN_PROGRESS -> {DONE, FAILED, PENDING}` according to
    /// `outcome`, per §4.4 step 4/5.
    pub async fn finish(&self, id: MediaId, outcome: Outcome) -> Result<()> {
        let (new_state, last_error) = match &outcome {
            Outcome::Done => (MediaState::Done, String::new()),
            Outcome::Failed { reason } => (MediaState::Failed, reason.clone()),
            Outcome::SourceChanged => (MediaState::Pending, String::new()),
        };

        let result = sqlx::query(
            "UPDATE media_entries SET state = ?1, last_error = ?2, workdir_path = '', \
             pre_hash = '', updated_at = ?3 WHERE id = ?4 AND state = 'in_progress'",
        )
        .bind(new_state.as_str())
        .bind(&last_error)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!(
                "entry {id} is not IN_PROGRESS"
            )));
        }
        if matches!(new_state, MediaState::Pending) {
            self.wake_waiters();
        }
        Ok(())
    }

    /// Transitions any state to `GONE` when the file is no longer present
    /// on disk. A tombstone: `GONE` entries are never deleted.
    pub async fn mark_gone(&self, id: MediaId) -> Result<()> {
        sqlx::query(
            "UPDATE media_entries SET state = 'gone', workdir_path = '', pre_hash = '', \
             updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explicit request to re-process: from `SKIP`/`FAILED`/`DONE` back to
    /// `PENDING`. Fails (`Conflict`, mapped to HTTP 409) from `GONE` or any
    /// non-terminal state.
    pub async fn enqueue(&self, id: MediaId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE media_entries SET state = 'pending', updated_at = ?1 \
             WHERE id = ?2 AND state IN ('skip', 'failed', 'done')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(format!(
                "entry {id} cannot be enqueued from its current state"
            )));
        }
        self.wake_waiters();
        Ok(())
    }

    /// Promotes the best `SKIP`/`FAILED` candidate to `PENDING` using the
    /// same tie-break as [`Catalog::claim_next`]. Used by
    /// `POST /request/enqueue/best`.
    pub async fn enqueue_best(&self) -> Result<Option<MediaId>> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query(
            "SELECT id FROM media_entries WHERE state IN ('skip', 'failed') \
             ORDER BY size_bytes DESC, updated_at ASC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        sqlx::query("UPDATE media_entries SET state = 'pending', updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.wake_waiters();
        let media_id = MediaId::from(
            uuid::Uuid::parse_str(&id).map_err(|e| CoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        );
        Ok(Some(media_id))
    }

    /// Read-only lookup by id.
    pub async fn get(&self, id: MediaId) -> Result<MediaEntry> {
        let row = sqlx::query("SELECT * FROM media_entries WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CoreError::NotFound(id.as_uuid()))?;
        row_to_entry(&row)
    }

    /// Read-only lookup by path, used by the scanner's cheap-probe check.
    pub async fn get_by_path(&self, path: &str) -> Result<Option<MediaEntry>> {
        let row = sqlx::query("SELECT * FROM media_entries WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    /// The live (non-`GONE`) entry, if any, carrying `hash`. Used by the
    /// scanner to tell a renamed/moved file from a genuine duplicate
    /// before it decides whether `upsert_by_path` should refresh an
    /// existing row at a new path or a fresh row should be inserted (S4).
    pub async fn find_live_by_content_hash(&self, hash: &str) -> Result<Option<MediaEntry>> {
        let row = sqlx::query(
            "SELECT * FROM media_entries WHERE content_hash = ?1 AND state != 'gone' LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    /// Repoints an existing entry at a new path without touching any
    /// other column, for the case where the scanner has established that
    /// the file at `id`'s old path is gone and an identical-content file
    /// has appeared at `new_path` instead (a rename, not a duplicate).
    pub async fn move_entry_path(&self, id: MediaId, new_path: &str) -> Result<()> {
        sqlx::query("UPDATE media_entries SET path = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(new_path)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read-only listing, optionally filtered by state and/or category.
    pub async fn list(&self, filter: &EntryFilter) -> Result<Vec<MediaEntry>> {
        let mut query = String::from("SELECT * FROM media_entries WHERE 1=1");
        if filter.state.is_some() {
            query.push_str(" AND state = ?1");
        }
        if filter.category.is_some() {
            query.push_str(if filter.state.is_some() {
                " AND category = ?2"
            } else {
                " AND category = ?1"
            });
        }
        query.push_str(" ORDER BY updated_at DESC");

        let mut q = sqlx::query(&query);
        if let Some(state) = filter.state {
            q = q.bind(state.as_str());
        }
        if let Some(category) = filter.category {
            q = q.bind(category.to_string());
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Every non-terminal entry, used by the Recovery pass at startup.
    pub async fn list_non_terminal(&self) -> Result<Vec<MediaEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM media_entries WHERE state IN ('queued', 'in_progress')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Every entry whose state is not yet `GONE`, used by the Scanner's
    /// vanished-file and de-duplication passes.
    pub async fn list_live(&self) -> Result<Vec<MediaEntry>> {
        let rows = sqlx::query("SELECT * FROM media_entries WHERE state != 'gone'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Resets an entry to `PENDING`, clearing `workdir_path` and
    /// `pre_hash`. Used by Recovery (steps 2 and 4) when no salvage is
    /// possible.
    pub async fn reset_to_pending(&self, id: MediaId) -> Result<()> {
        sqlx::query(
            "UPDATE media_entries SET state = 'pending', workdir_path = '', pre_hash = '', \
             updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        self.wake_waiters();
        Ok(())
    }

    /// Directly transitions a `QUEUED`/`IN_PROGRESS` entry to `DONE` after a
    /// successful salvage (Recovery step 3) or worker replacement (§4.4
    /// step 4), bypassing the normal `IN_PROGRESS`-only guard in
    /// [`Catalog::finish`] since Recovery runs before any entry is claimed.
    pub async fn force_done(&self, id: MediaId) -> Result<()> {
        sqlx::query(
            "UPDATE media_entries SET state = 'done', workdir_path = '', pre_hash = '', \
             last_error = '', updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<MediaEntry> {
    let id: String = row.try_get("id")?;
    let category: String = row.try_get("category")?;
    let state: String = row.try_get("state")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(MediaEntry {
        id: MediaId::from(
            uuid::Uuid::parse_str(&id).map_err(|e| CoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        ),
        path: row.try_get("path")?,
        content_hash: row.try_get("content_hash")?,
        size_bytes: row.try_get("size_bytes")?,
        codec: row.try_get("codec")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        bitrate_bps: row.try_get("bitrate_bps")?,
        duration_s: row.try_get("duration_s")?,
        category: Category::from_str(&category)
            .map_err(|e| CoreError::Database(sqlx::Error::Decode(e.into())))?,
        state: MediaState::parse(&state).ok_or_else(|| {
            CoreError::Database(sqlx::Error::Decode(format!("bad state {state}").into()))
        })?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        workdir_path: row.try_get("workdir_path")?,
        pre_hash: row.try_get("pre_hash")?,
        probed_mtime: {
            let raw: String = row.try_get("probed_mtime")?;
            chrono::DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CoreError::Database(sqlx::Error::Decode(e.into())))?
        },
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CoreError::Database(sqlx::Error::Decode(e.into())))?,
    })
}
