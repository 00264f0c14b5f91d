use backup_engine::EngineConfig;
use std::path::PathBuf;

pub const PRIMARY_PROVIDER: &str = "primary";
pub const ARCHIVE_PROVIDER: &str = "archive";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub archive_storage_dir: PathBuf,
    /// Provider new artifacts are written to.
    pub storage_provider: String,
    pub max_full_backup_age_days: i64,
    pub scheduler_cron: String,
    pub max_concurrent_jobs: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "./data".into()));
        let defaults = EngineConfig::default();

        Self {
            db_path: lookup("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("backup-engine.db")),
            storage_dir: lookup("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("objects")),
            archive_storage_dir: lookup("ARCHIVE_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("archive")),
            data_dir,
            storage_provider: lookup("STORAGE_PROVIDER").unwrap_or_else(|| PRIMARY_PROVIDER.into()),
            max_full_backup_age_days: lookup("MAX_FULL_BACKUP_AGE_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_full_backup_age_days),
            scheduler_cron: lookup("SCHEDULER_CRON").unwrap_or(defaults.scheduler_cron),
            max_concurrent_jobs: lookup("MAX_CONCURRENT_JOBS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent_jobs),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_full_backup_age_days: self.max_full_backup_age_days,
            scheduler_cron: self.scheduler_cron.clone(),
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}
