use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{fmt_ts, opt_ts_column, text_enum, ts_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Full,
    Incremental,
}

text_enum!(ArtifactKind, "artifact kind", {
    Full => "full",
    Incremental => "incremental",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Creating,
    Processing,
    Uploading,
    Completed,
    Failed,
}

text_enum!(ArtifactStatus, "artifact status", {
    Creating => "creating",
    Processing => "processing",
    Uploading => "uploading",
    Completed => "completed",
    Failed => "failed",
});

impl ArtifactStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactStatus::Completed | ArtifactStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub added: i64,
    pub modified: i64,
    pub deleted: i64,
}

impl ChangeCounts {
    pub fn total(&self) -> i64 {
        self.added + self.modified + self.deleted
    }
}

/// One full or incremental backup of a target. The path catalog lives in
/// `artifact_checksums` and is loaded through `checksum_catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: String,
    pub target_id: String,
    pub kind: ArtifactKind,
    pub parent_id: Option<String>,
    pub status: ArtifactStatus,
    /// Object storage provider chosen at creation; all later reads and
    /// deletes go through this provider.
    pub provider: String,
    pub change_counts: ChangeCounts,
    pub size_bytes: i64,
    pub progress_message: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn row_to_artifact(row: &Row) -> rusqlite::Result<BackupArtifact> {
    Ok(BackupArtifact {
        id: row.get("id")?,
        target_id: row.get("target_id")?,
        kind: row.get("kind")?,
        parent_id: row.get("parent_id")?,
        status: row.get("status")?,
        provider: row.get("provider")?,
        change_counts: ChangeCounts {
            added: row.get("files_added")?,
            modified: row.get("files_modified")?,
            deleted: row.get("files_deleted")?,
        },
        size_bytes: row.get("size_bytes")?,
        progress_message: row.get("progress_message")?,
        error: row.get("error")?,
        created_at: ts_column(row, "created_at")?,
        completed_at: opt_ts_column(row, "completed_at")?,
    })
}

fn query_one(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> anyhow::Result<Option<BackupArtifact>> {
    Ok(conn.query_row(sql, params, row_to_artifact).optional()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupArtifact>> {
    query_one(conn, "SELECT * FROM backup_artifacts WHERE id = ?", params![id])
}

/// Backup history for a target, newest first.
pub fn find_by_target(conn: &Connection, target_id: &str, limit: i64) -> anyhow::Result<Vec<BackupArtifact>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_artifacts WHERE target_id = ? ORDER BY created_at DESC LIMIT ?",
    )?;
    let rows = stmt.query_map(params![target_id, limit], row_to_artifact)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_latest_completed(
    conn: &Connection,
    target_id: &str,
    kind: Option<ArtifactKind>,
) -> anyhow::Result<Option<BackupArtifact>> {
    match kind {
        Some(kind) => query_one(
            conn,
            "SELECT * FROM backup_artifacts WHERE target_id = ? AND kind = ? AND status = 'completed'
             ORDER BY completed_at DESC LIMIT 1",
            params![target_id, kind],
        ),
        None => query_one(
            conn,
            "SELECT * FROM backup_artifacts WHERE target_id = ? AND status = 'completed'
             ORDER BY completed_at DESC LIMIT 1",
            params![target_id],
        ),
    }
}

/// Latest completed artifact whose completion does not overshoot `at`.
pub fn find_latest_completed_before(
    conn: &Connection,
    target_id: &str,
    at: &DateTime<Utc>,
) -> anyhow::Result<Option<BackupArtifact>> {
    query_one(
        conn,
        "SELECT * FROM backup_artifacts WHERE target_id = ? AND status = 'completed' AND completed_at <= ?
         ORDER BY completed_at DESC LIMIT 1",
        params![target_id, fmt_ts(at)],
    )
}

pub fn find_in_flight(conn: &Connection, target_id: &str) -> anyhow::Result<Option<BackupArtifact>> {
    query_one(
        conn,
        "SELECT * FROM backup_artifacts WHERE target_id = ? AND status NOT IN ('completed','failed') LIMIT 1",
        params![target_id],
    )
}

pub fn find_all_in_flight(conn: &Connection) -> anyhow::Result<Vec<BackupArtifact>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_artifacts WHERE status NOT IN ('completed','failed')")?;
    let rows = stmt.query_map([], row_to_artifact)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_created_since(conn: &Connection, target_id: &str, since: &DateTime<Utc>) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM backup_artifacts WHERE target_id = ? AND created_at >= ?",
        params![target_id, fmt_ts(since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn has_children(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM backup_artifacts WHERE parent_id = ?",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub struct NewArtifact {
    pub target_id: String,
    pub kind: ArtifactKind,
    pub parent_id: Option<String>,
    pub provider: String,
    pub change_counts: ChangeCounts,
    pub created_at: DateTime<Utc>,
}

pub fn create(conn: &Connection, data: &NewArtifact) -> anyhow::Result<BackupArtifact> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO backup_artifacts
           (id, target_id, kind, parent_id, status, provider, files_added, files_modified, files_deleted, progress_message, created_at)
         VALUES (?1, ?2, ?3, ?4, 'creating', ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            data.target_id,
            data.kind,
            data.parent_id,
            data.provider,
            data.change_counts.added,
            data.change_counts.modified,
            data.change_counts.deleted,
            format!("Creating {} backup", data.kind),
            fmt_ts(&data.created_at),
        ],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created artifact"))
}

// Every update below is guarded on a non-terminal status, so a finished
// artifact is never rewritten.

pub fn update_status(conn: &Connection, id: &str, status: ArtifactStatus, message: &str) -> anyhow::Result<bool> {
    let changes = conn.execute(
        "UPDATE backup_artifacts SET status = ?, progress_message = ?
         WHERE id = ? AND status NOT IN ('completed','failed')",
        params![status, message, id],
    )?;
    Ok(changes > 0)
}

pub fn update_change_counts(conn: &Connection, id: &str, counts: &ChangeCounts) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_artifacts SET files_added = ?, files_modified = ?, files_deleted = ?
         WHERE id = ? AND status NOT IN ('completed','failed')",
        params![counts.added, counts.modified, counts.deleted, id],
    )?;
    Ok(())
}

pub fn update_completion(
    conn: &Connection,
    id: &str,
    size_bytes: i64,
    completed_at: &DateTime<Utc>,
) -> anyhow::Result<bool> {
    let changes = conn.execute(
        "UPDATE backup_artifacts SET status = 'completed', size_bytes = ?, progress_message = 'Backup completed', completed_at = ?
         WHERE id = ? AND status NOT IN ('completed','failed')",
        params![size_bytes, fmt_ts(completed_at), id],
    )?;
    Ok(changes > 0)
}

pub fn update_failed(conn: &Connection, id: &str, error: &str) -> anyhow::Result<bool> {
    let now = fmt_ts(&Utc::now());
    let changes = conn.execute(
        "UPDATE backup_artifacts SET status = 'failed', error = ?, progress_message = 'Backup failed', completed_at = ?
         WHERE id = ? AND status NOT IN ('completed','failed')",
        params![error, now, id],
    )?;
    Ok(changes > 0)
}

pub fn delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changes = conn.execute("DELETE FROM backup_artifacts WHERE id = ?", params![id])?;
    Ok(changes > 0)
}
