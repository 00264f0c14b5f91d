use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{fmt_ts, ts_column};

/// A managed content tree (site) that backups are taken of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTarget {
    pub id: String,
    pub name: String,
    /// Locator handed to the site agent, e.g. the document root.
    pub root_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub root_path: String,
}

fn row_to_target(row: &Row) -> rusqlite::Result<ManagedTarget> {
    Ok(ManagedTarget {
        id: row.get("id")?,
        name: row.get("name")?,
        root_path: row.get("root_path")?,
        created_at: ts_column(row, "created_at")?,
    })
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<ManagedTarget>> {
    let mut stmt = conn.prepare("SELECT * FROM targets ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], row_to_target)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<ManagedTarget>> {
    let target = conn
        .query_row("SELECT * FROM targets WHERE id = ?", params![id], row_to_target)
        .optional()?;
    Ok(target)
}

pub fn create(conn: &Connection, data: &CreateTargetRequest) -> anyhow::Result<ManagedTarget> {
    let id = data
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = fmt_ts(&Utc::now());
    conn.execute(
        "INSERT INTO targets (id, name, root_path, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, data.name, data.root_path, now],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created target"))
}
