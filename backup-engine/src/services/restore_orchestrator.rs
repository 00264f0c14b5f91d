use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::capabilities::RestoreStep;
use crate::db::connection::with_conn;
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::models::backup_artifact::{self, ArtifactStatus, BackupArtifact};
use crate::models::restore_job::{self, NewRestoreJob, RestoreFailure, RestoreJob, RestoreStatus};
use crate::models::target::ManagedTarget;
use crate::registry::{ClaimKind, TargetClaim};
use crate::services::backup_chain::build_chain;
use crate::services::{claim_error, load_target};
use crate::state::EngineState;
use crate::storage::{object_key, ArtifactManifest, CONTENT_OBJECT, MANIFEST_OBJECT};

/// A chain element that could not be restored.
struct StepFailure {
    index: Option<usize>,
    artifact_id: Option<String>,
    error: EngineError,
}

impl StepFailure {
    fn at(index: usize, artifact_id: &str, error: EngineError) -> Self {
        Self {
            index: Some(index),
            artifact_id: Some(artifact_id.to_string()),
            error,
        }
    }

    fn before_chain(error: EngineError) -> Self {
        Self {
            index: None,
            artifact_id: None,
            error,
        }
    }
}

/// Restores `target_id` to the newest completed artifact whose completion is
/// at or before `timestamp`. The chain is resolved and frozen on the job
/// before this returns; application runs in the background.
pub async fn restore_to_point_in_time(
    state: Arc<EngineState>,
    target_id: &str,
    timestamp: DateTime<Utc>,
    requested_by: &str,
) -> EngineResult<RestoreJob> {
    let target = load_target(&state, target_id).await?;
    let claim = state
        .registry
        .claim(target_id, ClaimKind::Restore)
        .map_err(|held| claim_error(held, target_id))?;

    let tid = target_id.to_string();
    let (backup_in_flight, restore_in_flight) = with_conn(&state.db, move |conn| {
        Ok((
            backup_artifact::find_in_flight(conn, &tid)?.is_some(),
            restore_job::find_in_flight(conn, &tid)?.is_some(),
        ))
    })
    .await?;
    if backup_in_flight {
        return Err(EngineError::BackupInProgress(target_id.to_string()));
    }
    if restore_in_flight {
        return Err(EngineError::RestoreInProgress(target_id.to_string()));
    }

    let tid = target_id.to_string();
    let chain = with_conn(&state.db, move |conn| {
        let Some(point) = backup_artifact::find_latest_completed_before(conn, &tid, &timestamp)? else {
            return Ok(Ok(None));
        };
        Ok(build_chain(conn, &point).map(Some))
    })
    .await??
    .ok_or_else(|| EngineError::NoBackupAvailable {
        target_id: target_id.to_string(),
        timestamp: timestamp.to_rfc3339(),
    })?;

    if let Some(unfinished) = chain.iter().find(|a| a.status != ArtifactStatus::Completed) {
        return Err(EngineError::ChainBroken(format!(
            "chain element {} is {}, not completed",
            unfinished.id, unfinished.status
        )));
    }

    let data = NewRestoreJob {
        target_id: target_id.to_string(),
        requested_by: requested_by.to_string(),
        target_timestamp: timestamp,
        backup_chain: chain.iter().map(|a| a.id.clone()).collect(),
    };
    let job = with_conn(&state.db, move |conn| restore_job::create(conn, &data)).await?;
    state.registry.track_restore(job.clone());

    tracing::info!(
        target_id,
        job_id = %job.id,
        chain_len = job.backup_chain.len(),
        point = %chain[chain.len() - 1].id,
        "Restore job created"
    );

    spawn_restore(state, target, job.clone(), claim);
    Ok(job)
}

fn spawn_restore(state: Arc<EngineState>, target: ManagedTarget, job: RestoreJob, claim: TargetClaim) {
    tokio::spawn(process_restore(state, target, job, claim));
}

async fn process_restore(state: Arc<EngineState>, target: ManagedTarget, job: RestoreJob, claim: TargetClaim) {
    let result = match state.job_slots.clone().acquire_owned().await {
        Ok(_permit) => apply_chain(&state, &target, &job).await,
        Err(e) => Err(StepFailure::before_chain(EngineError::Internal(e.into()))),
    };

    match result {
        Ok(()) => {
            tracing::info!(target_id = %target.id, job_id = %job.id, "Restore completed");
            state.events.publish(EngineEvent::RestoreCompleted {
                job_id: job.id.clone(),
                target_id: target.id.clone(),
            });
        }
        Err(failure) => {
            let message = failure.error.to_string();
            let failed_step = failure.index.map(|i| i as i64);
            tracing::error!(
                target_id = %target.id,
                job_id = %job.id,
                failed_step,
                failed_artifact_id = failure.artifact_id.as_deref(),
                error = %message,
                "Restore failed, target state is undefined"
            );

            let id = job.id.clone();
            let msg = message.clone();
            let artifact_id = failure.artifact_id.clone();
            let recorded = with_conn(&state.db, move |conn| {
                restore_job::update_failed(
                    conn,
                    &id,
                    &RestoreFailure {
                        error: &msg,
                        failed_step,
                        failed_artifact_id: artifact_id.as_deref(),
                    },
                )
            })
            .await;
            if let Err(e) = recorded {
                tracing::error!(job_id = %job.id, "Failed to record restore failure: {e:#}");
            }

            state.events.publish(EngineEvent::RestoreFailed {
                job_id: job.id.clone(),
                target_id: target.id.clone(),
                error: message,
                failed_step,
            });
        }
    }

    drop(claim);
    state.registry.evict_restore(&job.id);
}

/// Applies the frozen chain strictly in order: the full artifact first, then
/// every incremental on top of it.
async fn apply_chain(state: &EngineState, target: &ManagedTarget, job: &RestoreJob) -> Result<(), StepFailure> {
    let id = job.id.clone();
    let started = with_conn(&state.db, move |conn| restore_job::update_running(conn, &id))
        .await
        .map_err(|e| StepFailure::before_chain(e.into()))?;
    if !started {
        return Err(StepFailure::before_chain(EngineError::Internal(anyhow::anyhow!(
            "restore job {} is no longer pending",
            job.id
        ))));
    }
    let started_at = Utc::now();
    state.registry.update_restore(&job.id, |j| {
        j.status = RestoreStatus::Running;
        j.started_at = Some(started_at);
        j.progress_message = "Restore started".to_string();
    });

    let chain_len = job.backup_chain.len();
    for (index, artifact_id) in job.backup_chain.iter().enumerate() {
        let message = format!("Applying artifact {} ({}/{})", artifact_id, index + 1, chain_len);
        let id = job.id.clone();
        let msg = message.clone();
        with_conn(&state.db, move |conn| restore_job::update_progress(conn, &id, &msg))
            .await
            .map_err(|e| StepFailure::at(index, artifact_id, e.into()))?;
        state.registry.update_restore(&job.id, |j| j.progress_message = message);

        let step = load_step(state, artifact_id, index, chain_len)
            .await
            .map_err(|e| StepFailure::at(index, artifact_id, e))?;

        state
            .site
            .applier
            .apply(target, &step)
            .await
            .map_err(|e| StepFailure::at(index, artifact_id, EngineError::TargetUnreachable(format!("{e:#}"))))?;

        tracing::info!(job_id = %job.id, artifact_id, step = index, kind = %step.artifact.kind, "Restore step applied");
    }

    let id = job.id.clone();
    let completed = with_conn(&state.db, move |conn| restore_job::update_completion(conn, &id))
        .await
        .map_err(|e| StepFailure::before_chain(e.into()))?;
    if !completed {
        return Err(StepFailure::before_chain(EngineError::Internal(anyhow::anyhow!(
            "restore job {} left the running state",
            job.id
        ))));
    }
    Ok(())
}

/// Reads one chain element back through the provider it was stored with.
async fn load_step(state: &EngineState, artifact_id: &str, index: usize, chain_len: usize) -> EngineResult<RestoreStep> {
    let id = artifact_id.to_string();
    let artifact: BackupArtifact = with_conn(&state.db, move |conn| backup_artifact::find_by_id(conn, &id))
        .await?
        .ok_or_else(|| EngineError::ChainBroken(format!("artifact {} no longer exists", artifact_id)))?;

    let store = state.storage.get(&artifact.provider).ok_or_else(|| {
        EngineError::StorageReadFailed(format!("storage provider '{}' is not registered", artifact.provider))
    })?;

    let kind = artifact.kind.as_str();
    let content = store
        .get(&object_key(&artifact.target_id, kind, &artifact.id, CONTENT_OBJECT))
        .await
        .map_err(|e| EngineError::StorageReadFailed(format!("{e:#}")))?;
    let raw_manifest = store
        .get(&object_key(&artifact.target_id, kind, &artifact.id, MANIFEST_OBJECT))
        .await
        .map_err(|e| EngineError::StorageReadFailed(format!("{e:#}")))?;
    let manifest = ArtifactManifest::decode(&raw_manifest)
        .map_err(|e| EngineError::StorageReadFailed(format!("manifest of {}: {e:#}", artifact.id)))?;

    Ok(RestoreStep {
        index,
        chain_len,
        artifact,
        manifest,
        content,
    })
}

pub async fn get_restore_status(state: &EngineState, job_id: &str) -> EngineResult<RestoreJob> {
    if let Some(active) = state.registry.restore(job_id) {
        return Ok(active);
    }
    let id = job_id.to_string();
    with_conn(&state.db, move |conn| restore_job::find_by_id(conn, &id))
        .await?
        .ok_or_else(|| EngineError::RestoreJobNotFound(job_id.to_string()))
}

pub async fn get_restore_history(state: &EngineState, target_id: &str, limit: i64) -> EngineResult<Vec<RestoreJob>> {
    load_target(state, target_id).await?;
    let tid = target_id.to_string();
    Ok(with_conn(&state.db, move |conn| restore_job::find_by_target(conn, &tid, limit)).await?)
}
