mod commands;
mod config;
mod daemon;
mod lock;
mod logger;

use backup_agent::LocalSiteAgent;
use backup_engine::db::connection::{close_pool, create_pool};
use backup_engine::db::migrate::migrate;
use backup_engine::services::recovery::recover_interrupted;
use backup_engine::storage::{LocalObjectStore, StorageRegistry};
use backup_engine::{BackupService, EngineResult, EngineState, SiteCapabilities};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::config::{AppConfig, ARCHIVE_PROVIDER, PRIMARY_PROVIDER};
use crate::lock::InstanceLock;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the real-time backup scheduler until interrupted
    Serve,
    /// Manage backup targets
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// Take a backup (incremental unless --full) and wait for it to finish
    Backup {
        target: String,
        #[arg(long)]
        full: bool,
    },
    /// List backups (or restores) of a target, newest first
    History {
        target: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        restores: bool,
    },
    /// Restore a target to a point in time and wait for it to finish
    Restore {
        target: String,
        /// RFC 3339 timestamp; defaults to now
        #[arg(long)]
        at: Option<String>,
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
    /// Show a backup artifact or restore job
    Status {
        #[command(subcommand)]
        what: StatusKind,
    },
    /// Enable or disable real-time backup for a target
    Realtime {
        #[command(subcommand)]
        action: RealtimeAction,
    },
    /// Delete a backup artifact and its stored objects
    Delete { artifact: String },
}

#[derive(Subcommand, Debug)]
enum TargetAction {
    Add {
        #[arg(long)]
        name: String,
        /// Site root directory
        #[arg(long)]
        root: String,
        #[arg(long)]
        id: Option<String>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum StatusKind {
    Backup { id: String },
    Restore { id: String },
}

#[derive(Subcommand, Debug)]
enum RealtimeAction {
    Enable {
        target: String,
        /// Minimum seconds between two triggered backups
        #[arg(long)]
        interval: Option<i64>,
        #[arg(long)]
        max_daily: Option<i64>,
        /// Glob excluded from checksum reporting (repeatable)
        #[arg(long = "exclude")]
        excludes: Vec<String>,
    },
    Disable { target: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_env();

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logger::init(log_level)?;

    let (state, _lock) = build_state(&config).await?;
    let service = BackupService::new(state.clone());

    let result = match args.command {
        Command::Serve => {
            tracing::info!("Starting backup daemon v{}", env!("CARGO_PKG_VERSION"));
            daemon::serve(state.clone()).await?;
            Ok(())
        }
        command => run_command(&service, command).await,
    };

    close_pool(&state.db);

    if let Err(e) = result {
        eprintln!("{}", serde_json::to_string_pretty(&e.to_body())?);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(service: &BackupService, command: Command) -> EngineResult<()> {
    match command {
        Command::Serve => Ok(()),
        Command::Target { action } => match action {
            TargetAction::Add { name, root, id } => commands::add_target(service, id, name, root).await,
            TargetAction::List => commands::list_targets(service).await,
        },
        Command::Backup { target, full } => commands::backup(service, &target, full).await,
        Command::History { target, limit, restores } => commands::history(service, &target, limit, restores).await,
        Command::Restore {
            target,
            at,
            requested_by,
        } => commands::restore(service, &target, at.as_deref(), &requested_by).await,
        Command::Status { what } => match what {
            StatusKind::Backup { id } => commands::backup_status(service, &id).await,
            StatusKind::Restore { id } => commands::restore_status(service, &id).await,
        },
        Command::Realtime { action } => match action {
            RealtimeAction::Enable {
                target,
                interval,
                max_daily,
                excludes,
            } => commands::enable_realtime(service, &target, interval, max_daily, excludes).await,
            RealtimeAction::Disable { target } => commands::disable_realtime(service, &target).await,
        },
        Command::Delete { artifact } => commands::delete(service, &artifact).await,
    }
}

/// Opens the database and wires the engine to the local site agent and the
/// two filesystem providers. Interrupted work is recovered only when no other
/// process holds the database; the returned lock must be kept for the life of
/// the process.
async fn build_state(config: &AppConfig) -> anyhow::Result<(Arc<EngineState>, InstanceLock)> {
    std::fs::create_dir_all(&config.data_dir)?;
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let lock = InstanceLock::acquire(&config.db_path.with_extension("lock"))?;
    let pool = create_pool(&config.db_path.to_string_lossy())?;
    migrate(&pool)?;

    if lock.is_exclusive() {
        let recovered = recover_interrupted(&pool).await?;
        if recovered.artifacts > 0 || recovered.restore_jobs > 0 {
            tracing::warn!(
                artifacts = recovered.artifacts,
                restore_jobs = recovered.restore_jobs,
                "Recovered work interrupted by a previous run"
            );
        }
    } else {
        tracing::debug!("Another process is using the database, skipping recovery");
    }
    let lock = lock.share()?;

    let storage = StorageRegistry::new(config.storage_provider.clone())
        .with_provider(PRIMARY_PROVIDER, Arc::new(LocalObjectStore::new(&config.storage_dir)?))
        .with_provider(ARCHIVE_PROVIDER, Arc::new(LocalObjectStore::new(&config.archive_storage_dir)?));
    if storage.get(storage.default_provider()).is_none() {
        anyhow::bail!(
            "STORAGE_PROVIDER '{}' is not one of {:?}",
            config.storage_provider,
            storage.provider_names()
        );
    }

    let site = SiteCapabilities::from_agent(Arc::new(LocalSiteAgent::new()));
    let state = Arc::new(EngineState::new(pool, config.engine_config(), storage, site));
    Ok((state, lock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_engine::models::backup_artifact::{self, ArtifactKind, ArtifactStatus, ChangeCounts, NewArtifact};
    use backup_engine::models::target::CreateTargetRequest;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, provider: &str) -> AppConfig {
        AppConfig {
            data_dir: dir.path().to_path_buf(),
            db_path: dir.path().join("engine.db"),
            storage_dir: dir.path().join("objects"),
            archive_storage_dir: dir.path().join("archive"),
            storage_provider: provider.to_string(),
            max_full_backup_age_days: 7,
            scheduler_cron: "*/30 * * * * *".to_string(),
            max_concurrent_jobs: 2,
            log_level: "info".to_string(),
        }
    }

    async fn register_site(service: &BackupService, root: &std::path::Path) -> anyhow::Result<()> {
        service
            .register_target(CreateTargetRequest {
                id: Some("blog".into()),
                name: "Blog".into(),
                root_path: root.to_string_lossy().into_owned(),
            })
            .await?;
        Ok(())
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();

        let args = Args::try_parse_from([
            "backup-server",
            "realtime",
            "enable",
            "blog",
            "--interval",
            "120",
            "--exclude",
            "wp-content/cache/**",
            "--exclude",
            "*.log",
        ])
        .unwrap();
        match args.command {
            Command::Realtime {
                action: RealtimeAction::Enable { target, interval, excludes, .. },
            } => {
                assert_eq!(target, "blog");
                assert_eq!(interval, Some(120));
                assert_eq!(excludes.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_state_wires_both_providers() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (state, _lock) = build_state(&config_in(&dir, ARCHIVE_PROVIDER)).await?;
        assert_eq!(state.storage.default_provider(), ARCHIVE_PROVIDER);
        assert_eq!(state.storage.provider_names(), vec!["archive", "primary"]);
        assert!(dir.path().join("objects").is_dir());

        let dir = TempDir::new()?;
        assert!(build_state(&config_in(&dir, "s3")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_command_runs_to_completion() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let site_dir = dir.path().join("site");
        std::fs::create_dir_all(&site_dir)?;
        std::fs::write(site_dir.join("index.php"), b"v1")?;

        let (state, _lock) = build_state(&config_in(&dir, PRIMARY_PROVIDER)).await?;
        let service = BackupService::new(state);
        register_site(&service, &site_dir).await?;

        run_command(
            &service,
            Command::Backup {
                target: "blog".into(),
                full: true,
            },
        )
        .await?;

        let history = service.get_backup_history("blog", None).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ArtifactStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_recovery_skipped_while_another_process_holds_the_database() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = config_in(&dir, PRIMARY_PROVIDER);

        let (state, running) = build_state(&config).await?;
        let service = BackupService::new(state.clone());
        register_site(&service, &dir.path().join("site")).await?;
        let in_flight = {
            let conn = state.db.get()?;
            backup_artifact::create(
                &conn,
                &NewArtifact {
                    target_id: "blog".into(),
                    kind: ArtifactKind::Full,
                    parent_id: None,
                    provider: PRIMARY_PROVIDER.into(),
                    change_counts: ChangeCounts::default(),
                    created_at: chrono::Utc::now(),
                },
            )?
        };

        let (_, reader) = build_state(&config).await?;
        let current = service.get_backup_status(&in_flight.id).await?;
        assert_eq!(current.status, ArtifactStatus::Creating);

        drop(reader);
        drop(running);
        let (restarted, _lock) = build_state(&config).await?;
        let recovered = BackupService::new(restarted).get_backup_status(&in_flight.id).await?;
        assert_eq!(recovered.status, ArtifactStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_and_restore_of_a_local_site() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let site_dir = dir.path().join("site");
        std::fs::create_dir_all(&site_dir)?;
        std::fs::write(site_dir.join("index.php"), b"v1")?;

        let (state, _lock) = build_state(&config_in(&dir, PRIMARY_PROVIDER)).await?;
        let service = BackupService::new(state);
        register_site(&service, &site_dir).await?;

        commands::backup(&service, "blog", false).await?;
        let artifact = service.get_backup_history("blog", None).await?.remove(0);
        assert_eq!(artifact.status, ArtifactStatus::Completed);

        std::fs::write(site_dir.join("index.php"), b"v2")?;
        std::fs::write(site_dir.join("extra.txt"), b"x")?;

        let at = artifact.completed_at.unwrap().to_rfc3339();
        commands::restore(&service, "blog", Some(at.as_str()), "test").await?;
        let done = service.get_restore_history("blog", None).await?.remove(0);
        assert_eq!(done.status.as_str(), "completed");
        assert_eq!(std::fs::read(site_dir.join("index.php"))?, b"v1");
        assert!(!site_dir.join("extra.txt").exists());
        Ok(())
    }
}
