use chrono::{DateTime, TimeZone, Utc};
use globset::Glob;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::db::connection::with_conn;
use crate::error::{EngineError, EngineResult};
use crate::models::backup_artifact;
use crate::models::realtime_config::{self, RealTimeBackupConfig, RealTimeSettings};
use crate::services::backup_orchestrator::{self, BackupOutcome};
use crate::services::load_target;
use crate::state::EngineState;

/// Drives real-time backups: on every cron tick each enabled target whose
/// watch interval has elapsed gets an incremental backup, as long as it is
/// idle and below its daily cap.
pub struct RealTimeScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<EngineState>,
}

impl RealTimeScheduler {
    pub async fn new(state: Arc<EngineState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let cron = self.state.config.scheduler_cron.clone();
        let state = self.state.clone();

        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                match run_tick(state).await {
                    Ok(report) if !report.is_empty() => {
                        tracing::debug!(targets = report.len(), "Real-time tick finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Real-time tick failed"),
                }
            })
        })?;

        let scheduler = self.scheduler.lock().await;
        scheduler.add(job).await?;
        scheduler.start().await?;
        tracing::info!(cron = %cron, "Real-time backup scheduler started");
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    WatchInterval,
    DailyCap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TickOutcome {
    Started { artifact_id: String },
    NoChanges,
    Skipped { reason: SkipReason },
    Failed { error: String },
}

pub type TickReport = Vec<(String, TickOutcome)>;

pub async fn enable(state: &EngineState, target_id: &str, settings: RealTimeSettings) -> EngineResult<RealTimeBackupConfig> {
    load_target(state, target_id).await?;
    validate_settings(&settings)?;

    let tid = target_id.to_string();
    let config = with_conn(&state.db, move |conn| realtime_config::upsert_enabled(conn, &tid, &settings)).await?;
    tracing::info!(
        target_id,
        watch_interval_seconds = config.watch_interval_seconds,
        max_daily_backups = config.max_daily_backups,
        excludes = config.exclude_patterns.len(),
        "Real-time backup enabled"
    );
    Ok(config)
}

pub async fn disable(state: &EngineState, target_id: &str) -> EngineResult<RealTimeBackupConfig> {
    load_target(state, target_id).await?;
    let tid = target_id.to_string();
    let config = with_conn(&state.db, move |conn| realtime_config::upsert_disabled(conn, &tid)).await?;
    tracing::info!(target_id, "Real-time backup disabled");
    Ok(config)
}

pub async fn get_config(state: &EngineState, target_id: &str) -> EngineResult<Option<RealTimeBackupConfig>> {
    load_target(state, target_id).await?;
    let tid = target_id.to_string();
    Ok(with_conn(&state.db, move |conn| realtime_config::find(conn, &tid)).await?)
}

/// Patterns are only checked for glob syntax here; matching happens in the
/// checksum reporter.
fn validate_settings(settings: &RealTimeSettings) -> EngineResult<()> {
    if settings.watch_interval_seconds < 1 {
        return Err(EngineError::InvalidConfig("watch interval must be at least one second".into()));
    }
    if settings.max_daily_backups < 1 {
        return Err(EngineError::InvalidConfig("max daily backups must be at least one".into()));
    }
    for pattern in &settings.exclude_patterns {
        Glob::new(pattern)
            .map_err(|e| EngineError::InvalidConfig(format!("invalid exclude pattern '{}': {}", pattern, e)))?;
    }
    Ok(())
}

/// One pass over every enabled target.
pub async fn run_tick(state: Arc<EngineState>) -> anyhow::Result<TickReport> {
    let configs = with_conn(&state.db, realtime_config::find_enabled).await?;
    let now = Utc::now();

    let runs = configs.into_iter().map(|config| {
        let state = state.clone();
        async move {
            let outcome = tick_target(state, &config, now).await;
            (config.target_id, outcome)
        }
    });
    Ok(futures_util::future::join_all(runs).await)
}

async fn tick_target(state: Arc<EngineState>, config: &RealTimeBackupConfig, now: DateTime<Utc>) -> TickOutcome {
    let target_id = config.target_id.as_str();

    if state.registry.claimed_by(target_id).is_some() {
        tracing::debug!(target_id, "Skipping real-time backup: target busy");
        return TickOutcome::Skipped { reason: SkipReason::InFlight };
    }

    if let Some(last) = config.last_triggered_at {
        if (now - last).num_seconds() < config.watch_interval_seconds {
            return TickOutcome::Skipped { reason: SkipReason::WatchInterval };
        }
    }

    let start_of_day = start_of_utc_day(now);
    let tid = target_id.to_string();
    let created_today = match with_conn(&state.db, move |conn| backup_artifact::count_created_since(conn, &tid, &start_of_day)).await {
        Ok(count) => count,
        Err(e) => return TickOutcome::Failed { error: format!("{e:#}") },
    };
    if created_today >= config.max_daily_backups {
        tracing::warn!(
            target_id,
            created_today,
            max_daily_backups = config.max_daily_backups,
            "Skipping real-time backup: daily cap reached"
        );
        return TickOutcome::Skipped { reason: SkipReason::DailyCap };
    }

    let tid = target_id.to_string();
    if let Err(e) = with_conn(&state.db, move |conn| realtime_config::update_last_triggered(conn, &tid, &now)).await {
        return TickOutcome::Failed { error: format!("{e:#}") };
    }

    tracing::info!(target_id, "Starting real-time backup");
    match backup_orchestrator::create_incremental_backup(state, target_id).await {
        Ok(BackupOutcome::Started { artifact }) => TickOutcome::Started { artifact_id: artifact.id },
        Ok(BackupOutcome::NoChanges { .. }) => TickOutcome::NoChanges,
        Err(EngineError::BackupInProgress(_)) | Err(EngineError::RestoreInProgress(_)) => {
            TickOutcome::Skipped { reason: SkipReason::InFlight }
        }
        Err(e) => {
            tracing::error!(target_id, error = %e, "Real-time backup failed to start");
            TickOutcome::Failed { error: e.to_string() }
        }
    }
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}
