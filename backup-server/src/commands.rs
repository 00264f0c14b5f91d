//! One-shot subcommands. Results are printed to stdout as JSON; engine errors
//! surface as an `ErrorBody`.
//!
//! Backup and restore processing runs on this process's runtime, so those
//! commands return only once the work is terminal.

use backup_engine::models::backup_artifact::BackupArtifact;
use backup_engine::models::realtime_config::RealTimeSettings;
use backup_engine::models::restore_job::RestoreJob;
use backup_engine::models::target::CreateTargetRequest;
use backup_engine::{BackupOutcome, BackupService, EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn print_json<T: Serialize>(value: &T) -> EngineResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{}", rendered);
    Ok(())
}

pub async fn add_target(service: &BackupService, id: Option<String>, name: String, root: String) -> EngineResult<()> {
    let target = service
        .register_target(CreateTargetRequest {
            id,
            name,
            root_path: root,
        })
        .await?;
    print_json(&target)
}

pub async fn list_targets(service: &BackupService) -> EngineResult<()> {
    print_json(&service.list_targets().await?)
}

pub async fn backup(service: &BackupService, target_id: &str, full: bool) -> EngineResult<()> {
    let outcome = if full {
        service.create_full_backup(target_id).await?
    } else {
        service.create_incremental_backup(target_id).await?
    };

    match &outcome {
        BackupOutcome::Started { artifact } => print_json(&wait_for_backup(service, &artifact.id).await?),
        BackupOutcome::NoChanges { .. } => print_json(&outcome),
    }
}

async fn wait_for_backup(service: &BackupService, artifact_id: &str) -> EngineResult<BackupArtifact> {
    loop {
        let current = service.get_backup_status(artifact_id).await?;
        if current.status.is_terminal() && service.state().registry.backup(artifact_id).is_none() {
            return Ok(current);
        }
        tracing::info!(artifact_id, status = %current.status, "{}", current.progress_message);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn history(service: &BackupService, target_id: &str, limit: Option<i64>, restores: bool) -> EngineResult<()> {
    if restores {
        print_json(&service.get_restore_history(target_id, limit).await?)
    } else {
        print_json(&service.get_backup_history(target_id, limit).await?)
    }
}

pub fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidConfig(format!("invalid timestamp '{}': {}", raw, e)))
}

pub async fn restore(
    service: &BackupService,
    target_id: &str,
    at: Option<&str>,
    requested_by: &str,
) -> EngineResult<()> {
    let timestamp = match at {
        Some(raw) => parse_timestamp(raw)?,
        None => Utc::now(),
    };
    let job = service.restore_to_point_in_time(target_id, timestamp, requested_by).await?;
    print_json(&wait_for_restore(service, &job.id).await?)
}

async fn wait_for_restore(service: &BackupService, job_id: &str) -> EngineResult<RestoreJob> {
    loop {
        let current = service.get_restore_status(job_id).await?;
        if current.status.is_terminal() && service.state().registry.restore(job_id).is_none() {
            return Ok(current);
        }
        tracing::info!(job_id, status = %current.status, "{}", current.progress_message);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn backup_status(service: &BackupService, artifact_id: &str) -> EngineResult<()> {
    print_json(&service.get_backup_status(artifact_id).await?)
}

pub async fn restore_status(service: &BackupService, job_id: &str) -> EngineResult<()> {
    print_json(&service.get_restore_status(job_id).await?)
}

pub async fn enable_realtime(
    service: &BackupService,
    target_id: &str,
    interval: Option<i64>,
    max_daily: Option<i64>,
    excludes: Vec<String>,
) -> EngineResult<()> {
    let defaults = RealTimeSettings::default();
    let settings = RealTimeSettings {
        watch_interval_seconds: interval.unwrap_or(defaults.watch_interval_seconds),
        exclude_patterns: excludes,
        max_daily_backups: max_daily.unwrap_or(defaults.max_daily_backups),
    };
    print_json(&service.enable_realtime_backup(target_id, settings).await?)
}

pub async fn disable_realtime(service: &BackupService, target_id: &str) -> EngineResult<()> {
    print_json(&service.disable_realtime_backup(target_id).await?)
}

pub async fn delete(service: &BackupService, artifact_id: &str) -> EngineResult<()> {
    service.delete_backup(artifact_id).await?;
    print_json(&serde_json::json!({ "deleted": artifact_id }))
}
