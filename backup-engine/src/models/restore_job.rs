use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{fmt_ts, opt_ts_column, text_enum, ts_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

text_enum!(RestoreStatus, "restore status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl RestoreStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RestoreStatus::Completed | RestoreStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreJob {
    pub id: String,
    pub target_id: String,
    pub requested_by: String,
    pub target_timestamp: DateTime<Utc>,
    /// Artifact ids, full backup first, frozen when the job is created.
    pub backup_chain: Vec<String>,
    pub status: RestoreStatus,
    pub progress_message: String,
    pub error: Option<String>,
    /// Index into `backup_chain` of the element that failed to apply.
    pub failed_step: Option<i64>,
    pub failed_artifact_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn row_to_job(row: &Row) -> rusqlite::Result<RestoreJob> {
    let chain_json: String = row.get("backup_chain")?;
    let backup_chain = serde_json::from_str(&chain_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(RestoreJob {
        id: row.get("id")?,
        target_id: row.get("target_id")?,
        requested_by: row.get("requested_by")?,
        target_timestamp: ts_column(row, "target_timestamp")?,
        backup_chain,
        status: row.get("status")?,
        progress_message: row.get("progress_message")?,
        error: row.get("error")?,
        failed_step: row.get("failed_step")?,
        failed_artifact_id: row.get("failed_artifact_id")?,
        created_at: ts_column(row, "created_at")?,
        started_at: opt_ts_column(row, "started_at")?,
        completed_at: opt_ts_column(row, "completed_at")?,
    })
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<RestoreJob>> {
    let job = conn
        .query_row("SELECT * FROM restore_jobs WHERE id = ?", params![id], row_to_job)
        .optional()?;
    Ok(job)
}

pub fn find_by_target(conn: &Connection, target_id: &str, limit: i64) -> anyhow::Result<Vec<RestoreJob>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM restore_jobs WHERE target_id = ? ORDER BY created_at DESC LIMIT ?",
    )?;
    let rows = stmt.query_map(params![target_id, limit], row_to_job)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_in_flight(conn: &Connection, target_id: &str) -> anyhow::Result<Option<RestoreJob>> {
    let job = conn
        .query_row(
            "SELECT * FROM restore_jobs WHERE target_id = ? AND status IN ('pending','running') LIMIT 1",
            params![target_id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

pub fn find_all_in_flight(conn: &Connection) -> anyhow::Result<Vec<RestoreJob>> {
    let mut stmt = conn.prepare("SELECT * FROM restore_jobs WHERE status IN ('pending','running')")?;
    let rows = stmt.query_map([], row_to_job)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub struct NewRestoreJob {
    pub target_id: String,
    pub requested_by: String,
    pub target_timestamp: DateTime<Utc>,
    pub backup_chain: Vec<String>,
}

pub fn create(conn: &Connection, data: &NewRestoreJob) -> anyhow::Result<RestoreJob> {
    let id = Uuid::new_v4().to_string();
    let now = fmt_ts(&Utc::now());
    let chain_json = serde_json::to_string(&data.backup_chain)?;
    conn.execute(
        "INSERT INTO restore_jobs (id, target_id, requested_by, target_timestamp, backup_chain, progress_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'Restore queued', ?6)",
        params![
            id,
            data.target_id,
            data.requested_by,
            fmt_ts(&data.target_timestamp),
            chain_json,
            now,
        ],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created restore job"))
}

pub fn update_running(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let now = fmt_ts(&Utc::now());
    let changes = conn.execute(
        "UPDATE restore_jobs SET status = 'running', started_at = ?, progress_message = 'Restore started'
         WHERE id = ? AND status = 'pending'",
        params![now, id],
    )?;
    Ok(changes > 0)
}

pub fn update_progress(conn: &Connection, id: &str, message: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE restore_jobs SET progress_message = ? WHERE id = ? AND status = 'running'",
        params![message, id],
    )?;
    Ok(())
}

pub fn update_completion(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let now = fmt_ts(&Utc::now());
    let changes = conn.execute(
        "UPDATE restore_jobs SET status = 'completed', progress_message = 'Restore completed', completed_at = ?
         WHERE id = ? AND status = 'running'",
        params![now, id],
    )?;
    Ok(changes > 0)
}

pub struct RestoreFailure<'a> {
    pub error: &'a str,
    pub failed_step: Option<i64>,
    pub failed_artifact_id: Option<&'a str>,
}

pub fn update_failed(conn: &Connection, id: &str, failure: &RestoreFailure<'_>) -> anyhow::Result<bool> {
    let now = fmt_ts(&Utc::now());
    let changes = conn.execute(
        "UPDATE restore_jobs SET status = 'failed', error = ?, failed_step = ?, failed_artifact_id = ?,
           progress_message = 'Restore failed', completed_at = ?
         WHERE id = ? AND status IN ('pending','running')",
        params![failure.error, failure.failed_step, failure.failed_artifact_id, now, id],
    )?;
    Ok(changes > 0)
}
