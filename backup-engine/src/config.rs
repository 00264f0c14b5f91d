/// Engine policy knobs. The server binary fills these from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A full backup older than this is no longer used as the base of new
    /// incrementals; `create_incremental_backup` takes a full backup instead.
    pub max_full_backup_age_days: i64,
    /// Cron expression (with seconds) on which the real-time scheduler ticks.
    pub scheduler_cron: String,
    /// Upper bound on backups and restores processed at the same time.
    pub max_concurrent_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_full_backup_age_days: 7,
            scheduler_cron: "*/30 * * * * *".to_string(),
            max_concurrent_jobs: 8,
        }
    }
}
