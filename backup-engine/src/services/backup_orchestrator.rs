use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::db::connection::with_conn;
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::models::backup_artifact::{self, ArtifactKind, ArtifactStatus, BackupArtifact, ChangeCounts, NewArtifact};
use crate::models::checksum_catalog::{self, Catalog};
use crate::models::realtime_config;
use crate::models::target::ManagedTarget;
use crate::registry::{ClaimKind, TargetClaim};
use crate::services::change_detector::{self, ChangeSet};
use crate::services::{claim_error, load_target};
use crate::state::EngineState;
use crate::storage::{object_key, ArtifactManifest, CONTENT_OBJECT, MANIFEST_OBJECT};

/// Result of a backup request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackupOutcome {
    /// An artifact was created and is being processed in the background.
    Started { artifact: BackupArtifact },
    /// Nothing changed since `parent_id`; no artifact was created.
    NoChanges { target_id: String, parent_id: String },
}

impl BackupOutcome {
    pub fn artifact(&self) -> Option<&BackupArtifact> {
        match self {
            BackupOutcome::Started { artifact } => Some(artifact),
            BackupOutcome::NoChanges { .. } => None,
        }
    }
}

/// What the processing routine has to do once the artifact exists.
enum BackupPlan {
    /// Checksums still have to be fetched; everything is collected.
    Full,
    /// Diff already computed at creation time.
    Incremental {
        changes: ChangeSet,
        catalog: Catalog,
        exclude_patterns: Vec<String>,
    },
}

pub async fn create_full_backup(state: Arc<EngineState>, target_id: &str) -> EngineResult<BackupOutcome> {
    let target = load_target(&state, target_id).await?;
    let claim = claim_for_backup(&state, target_id).await?;
    start_full_backup(state, target, claim).await
}

pub async fn create_incremental_backup(state: Arc<EngineState>, target_id: &str) -> EngineResult<BackupOutcome> {
    let target = load_target(&state, target_id).await?;
    let claim = claim_for_backup(&state, target_id).await?;

    let tid = target_id.to_string();
    let (latest_full, parent) = with_conn(&state.db, move |conn| {
        Ok((
            backup_artifact::find_latest_completed(conn, &tid, Some(ArtifactKind::Full))?,
            backup_artifact::find_latest_completed(conn, &tid, None)?,
        ))
    })
    .await?;

    let max_age = chrono::Duration::days(state.config.max_full_backup_age_days);
    let base_is_fresh = latest_full
        .as_ref()
        .and_then(|full| full.completed_at)
        .map(|completed| Utc::now() - completed <= max_age)
        .unwrap_or(false);

    let parent = match parent {
        Some(parent) if base_is_fresh => parent,
        _ => {
            tracing::info!(
                target_id,
                has_full = latest_full.is_some(),
                "No recent full backup, taking a full backup instead of an incremental"
            );
            return start_full_backup(state, target, claim).await;
        }
    };

    let exclude_patterns = load_exclude_patterns(&state, target_id).await?;
    let current = state
        .site
        .reporter
        .current_checksums(&target, &exclude_patterns)
        .await
        .map_err(|e| EngineError::TargetUnreachable(format!("{e:#}")))?;

    let parent_id = parent.id.clone();
    let previous = with_conn(&state.db, move |conn| checksum_catalog::load(conn, &parent_id)).await?;
    let changes = change_detector::diff(&previous, &current);

    if changes.is_empty() {
        tracing::info!(target_id, parent_id = %parent.id, "No changes since last backup, skipping");
        return Ok(BackupOutcome::NoChanges {
            target_id: target_id.to_string(),
            parent_id: parent.id,
        });
    }

    let artifact = insert_artifact(
        &state,
        NewArtifact {
            target_id: target_id.to_string(),
            kind: ArtifactKind::Incremental,
            parent_id: Some(parent.id.clone()),
            provider: state.storage.default_provider().to_string(),
            change_counts: changes.counts(),
            created_at: Utc::now(),
        },
    )
    .await?;

    tracing::info!(
        target_id,
        artifact_id = %artifact.id,
        parent_id = %parent.id,
        added = changes.added.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        "Incremental backup created"
    );

    spawn_processing(
        state,
        target,
        artifact.clone(),
        BackupPlan::Incremental {
            changes,
            catalog: current,
            exclude_patterns,
        },
        claim,
    );
    Ok(BackupOutcome::Started { artifact })
}

async fn start_full_backup(
    state: Arc<EngineState>,
    target: ManagedTarget,
    claim: TargetClaim,
) -> EngineResult<BackupOutcome> {
    let artifact = insert_artifact(
        &state,
        NewArtifact {
            target_id: target.id.clone(),
            kind: ArtifactKind::Full,
            parent_id: None,
            provider: state.storage.default_provider().to_string(),
            change_counts: ChangeCounts::default(),
            created_at: Utc::now(),
        },
    )
    .await?;

    tracing::info!(target_id = %target.id, artifact_id = %artifact.id, "Full backup created");

    spawn_processing(state, target, artifact.clone(), BackupPlan::Full, claim);
    Ok(BackupOutcome::Started { artifact })
}

/// Takes the in-memory claim, then double-checks the store so an artifact
/// left in flight by another process also blocks the target.
async fn claim_for_backup(state: &EngineState, target_id: &str) -> EngineResult<TargetClaim> {
    let claim = state
        .registry
        .claim(target_id, ClaimKind::Backup)
        .map_err(|held| claim_error(held, target_id))?;

    let tid = target_id.to_string();
    let in_flight = with_conn(&state.db, move |conn| backup_artifact::find_in_flight(conn, &tid)).await?;
    if let Some(existing) = in_flight {
        tracing::warn!(target_id, artifact_id = %existing.id, "Backup already in flight");
        return Err(EngineError::BackupInProgress(target_id.to_string()));
    }
    Ok(claim)
}

async fn insert_artifact(state: &EngineState, data: NewArtifact) -> EngineResult<BackupArtifact> {
    if state.storage.get(&data.provider).is_none() {
        return Err(EngineError::InvalidConfig(format!(
            "default storage provider '{}' is not registered",
            data.provider
        )));
    }
    let artifact = with_conn(&state.db, move |conn| backup_artifact::create(conn, &data)).await?;
    state.registry.track_backup(artifact.clone());
    Ok(artifact)
}

async fn load_exclude_patterns(state: &EngineState, target_id: &str) -> EngineResult<Vec<String>> {
    let tid = target_id.to_string();
    let config = with_conn(&state.db, move |conn| realtime_config::find(conn, &tid)).await?;
    Ok(config.map(|c| c.exclude_patterns).unwrap_or_default())
}

fn spawn_processing(
    state: Arc<EngineState>,
    target: ManagedTarget,
    artifact: BackupArtifact,
    plan: BackupPlan,
    claim: TargetClaim,
) {
    tokio::spawn(process_backup(state, target, artifact, plan, claim));
}

/// Background half of a backup. The claim is held until the artifact is
/// terminal.
async fn process_backup(
    state: Arc<EngineState>,
    target: ManagedTarget,
    artifact: BackupArtifact,
    plan: BackupPlan,
    claim: TargetClaim,
) {
    let result = match state.job_slots.clone().acquire_owned().await {
        Ok(_permit) => drive_backup(&state, &target, &artifact, plan).await,
        Err(e) => Err(EngineError::Internal(e.into())),
    };

    match result {
        Ok(size_bytes) => {
            tracing::info!(
                target_id = %target.id,
                artifact_id = %artifact.id,
                kind = %artifact.kind,
                size_bytes,
                "Backup completed"
            );
            state.events.publish(EngineEvent::BackupCompleted {
                artifact_id: artifact.id.clone(),
                target_id: target.id.clone(),
                kind: artifact.kind,
                size_bytes,
            });
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(target_id = %target.id, artifact_id = %artifact.id, error = %message, "Backup failed");

            let db = state.db.clone();
            let id = artifact.id.clone();
            let msg = message.clone();
            if let Err(db_err) = with_conn(&db, move |conn| backup_artifact::update_failed(conn, &id, &msg)).await {
                tracing::error!(artifact_id = %artifact.id, "Failed to record backup failure: {db_err:#}");
            }
            state.events.publish(EngineEvent::BackupFailed {
                artifact_id: artifact.id.clone(),
                target_id: target.id.clone(),
                error: message,
            });
        }
    }

    drop(claim);
    state.registry.evict_backup(&artifact.id);
}

/// Runs the artifact through processing and upload. Returns the stored size.
async fn drive_backup(
    state: &EngineState,
    target: &ManagedTarget,
    artifact: &BackupArtifact,
    plan: BackupPlan,
) -> EngineResult<i64> {
    let (changes, catalog, exclude_patterns) = match plan {
        BackupPlan::Incremental {
            changes,
            catalog,
            exclude_patterns,
        } => (changes, catalog, exclude_patterns),
        BackupPlan::Full => {
            let exclude_patterns = load_exclude_patterns(state, &target.id).await?;
            let catalog = state
                .site
                .reporter
                .current_checksums(target, &exclude_patterns)
                .await
                .map_err(|e| EngineError::TargetUnreachable(format!("{e:#}")))?;
            let changes = ChangeSet::everything(&catalog);

            let counts = changes.counts();
            let id = artifact.id.clone();
            with_conn(&state.db, move |conn| backup_artifact::update_change_counts(conn, &id, &counts)).await?;
            state.registry.update_backup(&artifact.id, |a| a.change_counts = counts);
            (changes, catalog, exclude_patterns)
        }
    };

    let paths = changes.changed_paths();
    transition(
        state,
        &artifact.id,
        ArtifactStatus::Processing,
        format!("Collecting {} changed files", paths.len()),
    )
    .await?;

    let content = state
        .site
        .collector
        .collect(target, &paths)
        .await
        .map_err(|e| EngineError::TargetUnreachable(format!("content collection failed: {e:#}")))?;

    transition(
        state,
        &artifact.id,
        ArtifactStatus::Uploading,
        format!("Uploading {} bytes to {}", content.len(), artifact.provider),
    )
    .await?;

    let store = state.storage.get(&artifact.provider).ok_or_else(|| {
        EngineError::StorageWriteFailed(format!("storage provider '{}' is not registered", artifact.provider))
    })?;

    let kind = artifact.kind.as_str();
    let manifest = ArtifactManifest::new(
        &artifact.id,
        &target.id,
        artifact.kind,
        artifact.parent_id.clone(),
        changes,
        catalog.clone(),
    )
    .with_exclude_patterns(exclude_patterns)
    .encode()?;
    let size_bytes = (content.len() + manifest.len()) as i64;

    store
        .put(&object_key(&target.id, kind, &artifact.id, CONTENT_OBJECT), content)
        .await
        .map_err(|e| EngineError::StorageWriteFailed(format!("{e:#}")))?;
    store
        .put(&object_key(&target.id, kind, &artifact.id, MANIFEST_OBJECT), manifest)
        .await
        .map_err(|e| EngineError::StorageWriteFailed(format!("{e:#}")))?;

    let id = artifact.id.clone();
    let completed = with_conn(&state.db, move |conn| {
        checksum_catalog::store(conn, &id, &catalog)?;
        backup_artifact::update_completion(conn, &id, size_bytes, &Utc::now())
    })
    .await?;
    if !completed {
        return Err(EngineError::Internal(anyhow::anyhow!(
            "artifact {} left the in-flight state during upload",
            artifact.id
        )));
    }

    Ok(size_bytes)
}

async fn transition(state: &EngineState, artifact_id: &str, status: ArtifactStatus, message: String) -> EngineResult<()> {
    let id = artifact_id.to_string();
    let msg = message.clone();
    let updated = with_conn(&state.db, move |conn| backup_artifact::update_status(conn, &id, status, &msg)).await?;
    if !updated {
        return Err(EngineError::Internal(anyhow::anyhow!(
            "artifact {} is no longer in flight",
            artifact_id
        )));
    }
    state.registry.update_backup(artifact_id, |a| {
        a.status = status;
        a.progress_message = message;
    });
    tracing::debug!(artifact_id, status = %status, "Backup transition");
    Ok(())
}

pub async fn get_backup_status(state: &EngineState, artifact_id: &str) -> EngineResult<BackupArtifact> {
    if let Some(active) = state.registry.backup(artifact_id) {
        return Ok(active);
    }
    let id = artifact_id.to_string();
    with_conn(&state.db, move |conn| backup_artifact::find_by_id(conn, &id))
        .await?
        .ok_or_else(|| EngineError::ArtifactNotFound(artifact_id.to_string()))
}

pub async fn get_backup_history(state: &EngineState, target_id: &str, limit: i64) -> EngineResult<Vec<BackupArtifact>> {
    load_target(state, target_id).await?;
    let tid = target_id.to_string();
    let history = with_conn(&state.db, move |conn| backup_artifact::find_by_target(conn, &tid, limit)).await?;
    Ok(history)
}

/// Removes a terminal artifact, its stored objects and its catalog. An
/// artifact that another artifact deltas against cannot be removed. Objects
/// are removed for failed artifacts too, since an upload may have stopped
/// after the content was written.
pub async fn delete_backup(state: &EngineState, artifact_id: &str) -> EngineResult<()> {
    let id = artifact_id.to_string();
    let (artifact, has_children) = with_conn(&state.db, move |conn| {
        let artifact = backup_artifact::find_by_id(conn, &id)?;
        let has_children = backup_artifact::has_children(conn, &id)?;
        Ok((artifact, has_children))
    })
    .await?;

    let artifact = artifact.ok_or_else(|| EngineError::ArtifactNotFound(artifact_id.to_string()))?;
    if !artifact.status.is_terminal() {
        return Err(EngineError::BackupInProgress(artifact.target_id));
    }
    if has_children {
        return Err(EngineError::HasDependents(artifact.id));
    }

    let store = state.storage.get(&artifact.provider).ok_or_else(|| {
        EngineError::StorageWriteFailed(format!("storage provider '{}' is not registered", artifact.provider))
    })?;
    let kind = artifact.kind.as_str();
    for name in [CONTENT_OBJECT, MANIFEST_OBJECT] {
        store
            .delete(&object_key(&artifact.target_id, kind, &artifact.id, name))
            .await
            .map_err(|e| EngineError::StorageWriteFailed(format!("{e:#}")))?;
    }

    let id = artifact.id.clone();
    with_conn(&state.db, move |conn| backup_artifact::delete(conn, &id)).await?;
    tracing::info!(artifact_id = %artifact.id, target_id = %artifact.target_id, "Backup artifact deleted");
    Ok(())
}
