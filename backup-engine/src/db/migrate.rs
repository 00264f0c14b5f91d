use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS targets (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  root_path TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_artifacts (
  id TEXT PRIMARY KEY,
  target_id TEXT NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
  kind TEXT NOT NULL CHECK(kind IN ('full','incremental')),
  parent_id TEXT,
  status TEXT NOT NULL DEFAULT 'creating' CHECK(status IN ('creating','processing','uploading','completed','failed')),
  provider TEXT NOT NULL,
  files_added INTEGER NOT NULL DEFAULT 0,
  files_modified INTEGER NOT NULL DEFAULT 0,
  files_deleted INTEGER NOT NULL DEFAULT 0,
  size_bytes INTEGER NOT NULL DEFAULT 0,
  progress_message TEXT NOT NULL DEFAULT '',
  error TEXT,
  created_at TEXT NOT NULL,
  completed_at TEXT,
  CHECK ((kind = 'full' AND parent_id IS NULL) OR (kind = 'incremental' AND parent_id IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS artifact_checksums (
  artifact_id TEXT NOT NULL REFERENCES backup_artifacts(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  checksum TEXT NOT NULL,
  PRIMARY KEY (artifact_id, path)
);

CREATE TABLE IF NOT EXISTS restore_jobs (
  id TEXT PRIMARY KEY,
  target_id TEXT NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
  requested_by TEXT NOT NULL,
  target_timestamp TEXT NOT NULL,
  backup_chain TEXT NOT NULL DEFAULT '[]',
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','running','completed','failed')),
  progress_message TEXT NOT NULL DEFAULT '',
  error TEXT,
  failed_step INTEGER,
  failed_artifact_id TEXT,
  created_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT
);

CREATE TABLE IF NOT EXISTS realtime_backup_configs (
  target_id TEXT PRIMARY KEY REFERENCES targets(id) ON DELETE CASCADE,
  enabled INTEGER NOT NULL DEFAULT 0,
  watch_interval_seconds INTEGER NOT NULL DEFAULT 300,
  exclude_patterns TEXT NOT NULL DEFAULT '[]',
  max_daily_backups INTEGER NOT NULL DEFAULT 24,
  last_triggered_at TEXT,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backup_artifacts_target ON backup_artifacts(target_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_backup_artifacts_completed ON backup_artifacts(target_id, status, completed_at DESC);
CREATE INDEX IF NOT EXISTS idx_backup_artifacts_parent ON backup_artifacts(parent_id);
CREATE INDEX IF NOT EXISTS idx_restore_jobs_target ON restore_jobs(target_id, created_at DESC);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
