//! Durable progress artifacts.
//!
//! Three files per job, never the same path:
//!
//! - `<job>.checkpoint`: full snapshot after every committed batch. Each
//!   commit holds a superset of the previous one.
//! - `<job>.partial`: written on interrupt or fatal error.
//! - `emergency_backup`: last resort when even the partial write fails.
//!
//! Checkpoint and partial files are written to a temporary sibling first and
//! renamed into place, so a crash mid-write leaves the previous file intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::CheckpointError;
use crate::types::job::JobCursor;
use crate::types::record::EnrichedRecord;

pub const CHECKPOINT_EXT: &str = "checkpoint";
pub const PARTIAL_EXT: &str = "partial";
pub const EMERGENCY_FILE: &str = "emergency_backup";

type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// A serialized snapshot of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job: String,
    pub run_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub cursor: JobCursor,
    pub record_count: usize,
    pub records: Vec<EnrichedRecord>,
}

pub struct CheckpointWriter {
    dir: PathBuf,
    job: String,
    run_id: Uuid,
    /// Record count of the last successful commit
    committed: Option<usize>,
}

impl CheckpointWriter {
    pub fn new(dir: impl Into<PathBuf>, job: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job: job.into(),
            run_id: Uuid::now_v7(),
            committed: None,
        }
    }

    /// Continue the monotonic sequence of a restored checkpoint.
    pub fn with_baseline(mut self, record_count: usize) -> Self {
        self.committed = Some(record_count);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// True once the main checkpoint holds this lineage's records, either
    /// committed by this writer or restored through [`with_baseline`](Self::with_baseline).
    pub fn has_committed(&self) -> bool {
        self.committed.is_some()
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        checkpoint_path(&self.dir, &self.job)
    }

    pub fn partial_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.job, PARTIAL_EXT))
    }

    pub fn emergency_path(&self) -> PathBuf {
        self.dir.join(EMERGENCY_FILE)
    }

    /// Overwrite the main checkpoint with the full accumulated list.
    ///
    /// Refuses to write fewer records than the previous commit.
    pub async fn commit(
        &mut self,
        records: &[EnrichedRecord],
        cursor: &JobCursor,
    ) -> CheckpointResult<PathBuf> {
        if let Some(previous) = self.committed {
            if records.len() < previous {
                return Err(CheckpointError::Regression {
                    previous,
                    attempted: records.len(),
                });
            }
        }

        let path = self.checkpoint_path();
        let body = serde_json::to_vec_pretty(&self.snapshot(records, cursor))?;
        write_atomic(&path, &body).await?;
        self.committed = Some(records.len());

        tracing::info!(
            job = %self.job,
            records = records.len(),
            next_batch = cursor.next_batch,
            path = %path.display(),
            "Checkpoint committed"
        );
        Ok(path)
    }

    /// Move an existing main checkpoint aside before a fresh lineage starts.
    ///
    /// The old file is renamed to `<job>.checkpoint.<run_id>` using the run id
    /// stored inside it, or this writer's run id if it cannot be read.
    /// Returns the new location of the old file, if there was one.
    pub async fn archive_existing(&self) -> CheckpointResult<Option<PathBuf>> {
        let path = self.checkpoint_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let lineage = serde_json::from_slice::<Lineage>(&bytes)
            .map(|l| l.run_id)
            .unwrap_or(self.run_id);
        let archived = self
            .dir
            .join(format!("{}.{}.{}", self.job, CHECKPOINT_EXT, lineage));
        tokio::fs::rename(&path, &archived)
            .await
            .map_err(|source| CheckpointError::Io {
                path: archived.clone(),
                source,
            })?;

        tracing::warn!(
            job = %self.job,
            archived = %archived.display(),
            "Existing checkpoint moved aside for a fresh run"
        );
        Ok(Some(archived))
    }

    /// Write the separate partial artifact.
    pub async fn write_partial(
        &self,
        records: &[EnrichedRecord],
        cursor: &JobCursor,
    ) -> CheckpointResult<PathBuf> {
        let path = self.partial_path();
        let body = serde_json::to_vec_pretty(&self.snapshot(records, cursor))?;
        write_atomic(&path, &body).await?;

        tracing::info!(job = %self.job, records = records.len(), path = %path.display(), "Partial results saved");
        Ok(path)
    }

    /// Best-effort dump, one JSON object per line. Never fails; returns the
    /// path only if something was written.
    pub async fn write_emergency(&self, records: &[EnrichedRecord]) -> Option<PathBuf> {
        let mut body = String::new();
        for record in records {
            match serde_json::to_string(record) {
                Ok(line) => body.push_str(&line),
                Err(_) => body.push_str(&format!("{}\t{}", record.id, record.label)),
            }
            body.push('\n');
        }

        let path = self.emergency_path();
        match tokio::fs::write(&path, body).await {
            Ok(()) => {
                tracing::warn!(records = records.len(), path = %path.display(), "Emergency backup written");
                Some(path)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Emergency backup failed");
                None
            }
        }
    }

    /// Save whatever was accumulated on abnormal termination: the partial
    /// artifact, or the emergency dump if that fails.
    pub async fn save_on_abort(
        &self,
        records: &[EnrichedRecord],
        cursor: &JobCursor,
    ) -> Option<PathBuf> {
        match self.write_partial(records, cursor).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(job = %self.job, error = %e, "Partial save failed, writing emergency backup");
                self.write_emergency(records).await
            }
        }
    }

    fn snapshot<'a>(
        &'a self,
        records: &'a [EnrichedRecord],
        cursor: &'a JobCursor,
    ) -> CheckpointRef<'a> {
        CheckpointRef {
            job: &self.job,
            run_id: self.run_id,
            saved_at: Utc::now(),
            cursor,
            record_count: records.len(),
            records,
        }
    }
}

/// Borrowed form of [`Checkpoint`] for serialization without cloning.
#[derive(Serialize)]
struct CheckpointRef<'a> {
    job: &'a str,
    run_id: Uuid,
    saved_at: DateTime<Utc>,
    cursor: &'a JobCursor,
    record_count: usize,
    records: &'a [EnrichedRecord],
}

/// Just enough of a stored checkpoint to name its lineage.
#[derive(Deserialize)]
struct Lineage {
    run_id: Uuid,
}

pub fn checkpoint_path(dir: &Path, job: &str) -> PathBuf {
    dir.join(format!("{}.{}", job, CHECKPOINT_EXT))
}

/// Load the main checkpoint of `job`, if one exists.
pub async fn load(dir: &Path, job: &str) -> CheckpointResult<Option<Checkpoint>> {
    let path = checkpoint_path(dir, job);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CheckpointError::Io { path, source }),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn write_atomic(path: &Path, body: &[u8]) -> CheckpointResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CheckpointError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body)
        .await
        .map_err(|source| CheckpointError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })
}
