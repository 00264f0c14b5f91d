use crate::db::connection::{with_conn, DbPool};
use crate::models::backup_artifact;
use crate::models::restore_job::{self, RestoreFailure};

pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub artifacts: usize,
    pub restore_jobs: usize,
}

/// Marks work left in flight by a previous process as failed. Nothing in the
/// new process drives it any more, and a non-terminal record would block its
/// target forever.
pub async fn recover_interrupted(pool: &DbPool) -> anyhow::Result<RecoveryReport> {
    with_conn(pool, |conn| {
        let mut report = RecoveryReport::default();

        for artifact in backup_artifact::find_all_in_flight(conn)? {
            if backup_artifact::update_failed(conn, &artifact.id, INTERRUPTED_MESSAGE)? {
                tracing::warn!(
                    artifact_id = %artifact.id,
                    target_id = %artifact.target_id,
                    status = %artifact.status,
                    "Marked interrupted backup as failed"
                );
                report.artifacts += 1;
            }
        }

        for job in restore_job::find_all_in_flight(conn)? {
            let failure = RestoreFailure {
                error: INTERRUPTED_MESSAGE,
                failed_step: None,
                failed_artifact_id: None,
            };
            if restore_job::update_failed(conn, &job.id, &failure)? {
                tracing::warn!(job_id = %job.id, target_id = %job.target_id, "Marked interrupted restore as failed");
                report.restore_jobs += 1;
            }
        }

        Ok(report)
    })
    .await
}
