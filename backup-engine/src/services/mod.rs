pub mod backup_chain;
pub mod backup_orchestrator;
pub mod change_detector;
pub mod realtime_scheduler;
pub mod recovery;
pub mod restore_orchestrator;
pub mod targets;

use crate::db::connection::with_conn;
use crate::error::{EngineError, EngineResult};
use crate::models::target::{self, ManagedTarget};
use crate::registry::ClaimKind;
use crate::state::EngineState;

pub(crate) async fn load_target(state: &EngineState, target_id: &str) -> EngineResult<ManagedTarget> {
    let id = target_id.to_string();
    with_conn(&state.db, move |conn| target::find_by_id(conn, &id))
        .await?
        .ok_or_else(|| EngineError::TargetNotFound(target_id.to_string()))
}

/// Maps the kind of operation already holding a target to the error the
/// caller sees.
pub(crate) fn claim_error(held: ClaimKind, target_id: &str) -> EngineError {
    match held {
        ClaimKind::Backup => EngineError::BackupInProgress(target_id.to_string()),
        ClaimKind::Restore => EngineError::RestoreInProgress(target_id.to_string()),
    }
}
