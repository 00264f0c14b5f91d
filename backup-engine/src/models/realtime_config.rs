use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{fmt_ts, opt_ts_column, ts_column};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealTimeBackupConfig {
    pub target_id: String,
    pub enabled: bool,
    pub watch_interval_seconds: i64,
    pub exclude_patterns: Vec<String>,
    pub max_daily_backups: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Settings supplied when real-time backup is enabled for a target.
#[derive(Debug, Clone, Deserialize)]
pub struct RealTimeSettings {
    #[serde(default = "default_watch_interval")]
    pub watch_interval_seconds: i64,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_max_daily_backups")]
    pub max_daily_backups: i64,
}

fn default_watch_interval() -> i64 {
    300
}

fn default_max_daily_backups() -> i64 {
    24
}

impl Default for RealTimeSettings {
    fn default() -> Self {
        Self {
            watch_interval_seconds: default_watch_interval(),
            exclude_patterns: Vec::new(),
            max_daily_backups: default_max_daily_backups(),
        }
    }
}

fn row_to_config(row: &Row) -> rusqlite::Result<RealTimeBackupConfig> {
    let patterns_json: String = row.get("exclude_patterns")?;
    let exclude_patterns = serde_json::from_str(&patterns_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(RealTimeBackupConfig {
        target_id: row.get("target_id")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        watch_interval_seconds: row.get("watch_interval_seconds")?,
        exclude_patterns,
        max_daily_backups: row.get("max_daily_backups")?,
        last_triggered_at: opt_ts_column(row, "last_triggered_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}

pub fn find(conn: &Connection, target_id: &str) -> anyhow::Result<Option<RealTimeBackupConfig>> {
    let config = conn
        .query_row(
            "SELECT * FROM realtime_backup_configs WHERE target_id = ?",
            params![target_id],
            row_to_config,
        )
        .optional()?;
    Ok(config)
}

pub fn find_enabled(conn: &Connection) -> anyhow::Result<Vec<RealTimeBackupConfig>> {
    let mut stmt = conn.prepare("SELECT * FROM realtime_backup_configs WHERE enabled = 1")?;
    let rows = stmt.query_map([], row_to_config)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Insert-or-update: enables real-time backup with the given settings.
pub fn upsert_enabled(conn: &Connection, target_id: &str, settings: &RealTimeSettings) -> anyhow::Result<RealTimeBackupConfig> {
    let patterns_json = serde_json::to_string(&settings.exclude_patterns)?;
    let now = fmt_ts(&Utc::now());
    conn.execute(
        "INSERT INTO realtime_backup_configs (target_id, enabled, watch_interval_seconds, exclude_patterns, max_daily_backups, updated_at)
         VALUES (?1, 1, ?2, ?3, ?4, ?5)
         ON CONFLICT(target_id) DO UPDATE SET
           enabled = 1,
           watch_interval_seconds = excluded.watch_interval_seconds,
           exclude_patterns = excluded.exclude_patterns,
           max_daily_backups = excluded.max_daily_backups,
           updated_at = excluded.updated_at",
        params![target_id, settings.watch_interval_seconds, patterns_json, settings.max_daily_backups, now],
    )?;
    find(conn, target_id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve real-time config"))
}

/// Insert-or-update: disables real-time backup, keeping any stored settings.
pub fn upsert_disabled(conn: &Connection, target_id: &str) -> anyhow::Result<RealTimeBackupConfig> {
    let now = fmt_ts(&Utc::now());
    conn.execute(
        "INSERT INTO realtime_backup_configs (target_id, enabled, updated_at) VALUES (?1, 0, ?2)
         ON CONFLICT(target_id) DO UPDATE SET enabled = 0, updated_at = excluded.updated_at",
        params![target_id, now],
    )?;
    find(conn, target_id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve real-time config"))
}

pub fn update_last_triggered(conn: &Connection, target_id: &str, at: &DateTime<Utc>) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE realtime_backup_configs SET last_triggered_at = ? WHERE target_id = ?",
        params![fmt_ts(at), target_id],
    )?;
    Ok(())
}
