//! Entry points for an outer layer (HTTP handlers, CLI). Every call returns an
//! `EngineResult` whose error converts to an `ErrorBody` with a stable kind.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::models::backup_artifact::BackupArtifact;
use crate::models::realtime_config::{RealTimeBackupConfig, RealTimeSettings};
use crate::models::restore_job::RestoreJob;
use crate::models::target::{CreateTargetRequest, ManagedTarget};
use crate::services::backup_orchestrator::{self, BackupOutcome};
use crate::services::{realtime_scheduler, restore_orchestrator, targets};
use crate::state::EngineState;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct BackupService {
    state: Arc<EngineState>,
}

impl BackupService {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub async fn register_target(&self, req: CreateTargetRequest) -> EngineResult<ManagedTarget> {
        targets::register_target(&self.state, req).await
    }

    pub async fn list_targets(&self) -> EngineResult<Vec<ManagedTarget>> {
        targets::list_targets(&self.state).await
    }

    pub async fn create_full_backup(&self, target_id: &str) -> EngineResult<BackupOutcome> {
        backup_orchestrator::create_full_backup(self.state.clone(), target_id).await
    }

    pub async fn create_incremental_backup(&self, target_id: &str) -> EngineResult<BackupOutcome> {
        backup_orchestrator::create_incremental_backup(self.state.clone(), target_id).await
    }

    pub async fn get_backup_status(&self, artifact_id: &str) -> EngineResult<BackupArtifact> {
        backup_orchestrator::get_backup_status(&self.state, artifact_id).await
    }

    pub async fn get_backup_history(&self, target_id: &str, limit: Option<i64>) -> EngineResult<Vec<BackupArtifact>> {
        backup_orchestrator::get_backup_history(&self.state, target_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await
    }

    pub async fn delete_backup(&self, artifact_id: &str) -> EngineResult<()> {
        backup_orchestrator::delete_backup(&self.state, artifact_id).await
    }

    pub async fn enable_realtime_backup(
        &self,
        target_id: &str,
        settings: RealTimeSettings,
    ) -> EngineResult<RealTimeBackupConfig> {
        realtime_scheduler::enable(&self.state, target_id, settings).await
    }

    pub async fn disable_realtime_backup(&self, target_id: &str) -> EngineResult<RealTimeBackupConfig> {
        realtime_scheduler::disable(&self.state, target_id).await
    }

    pub async fn get_realtime_config(&self, target_id: &str) -> EngineResult<Option<RealTimeBackupConfig>> {
        realtime_scheduler::get_config(&self.state, target_id).await
    }

    pub async fn restore_to_point_in_time(
        &self,
        target_id: &str,
        timestamp: DateTime<Utc>,
        requested_by: &str,
    ) -> EngineResult<RestoreJob> {
        restore_orchestrator::restore_to_point_in_time(self.state.clone(), target_id, timestamp, requested_by).await
    }

    pub async fn get_restore_status(&self, job_id: &str) -> EngineResult<RestoreJob> {
        restore_orchestrator::get_restore_status(&self.state, job_id).await
    }

    pub async fn get_restore_history(&self, target_id: &str, limit: Option<i64>) -> EngineResult<Vec<RestoreJob>> {
        restore_orchestrator::get_restore_history(&self.state, target_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.state.events.subscribe()
    }
}
