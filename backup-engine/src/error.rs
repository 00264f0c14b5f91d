use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("a backup is already in progress for target {0}")]
    BackupInProgress(String),

    #[error("a restore is already in progress for target {0}")]
    RestoreInProgress(String),

    #[error("target unreachable: {0}")]
    TargetUnreachable(String),

    #[error("backup chain broken: {0}")]
    ChainBroken(String),

    #[error("no backup available for target {target_id} at or before {timestamp}")]
    NoBackupAvailable { target_id: String, timestamp: String },

    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("storage read failed: {0}")]
    StorageReadFailed(String),

    #[error("backup artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("restore job not found: {0}")]
    RestoreJobNotFound(String),

    #[error("backup artifact {0} is the parent of another artifact")]
    HasDependents(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error classification handed across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TargetNotFound,
    BackupInProgress,
    RestoreInProgress,
    TargetUnreachable,
    ChainBroken,
    NoBackupAvailable,
    StorageWriteFailed,
    StorageReadFailed,
    ArtifactNotFound,
    RestoreJobNotFound,
    HasDependents,
    InvalidConfig,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TargetNotFound(_) => ErrorKind::TargetNotFound,
            EngineError::BackupInProgress(_) => ErrorKind::BackupInProgress,
            EngineError::RestoreInProgress(_) => ErrorKind::RestoreInProgress,
            EngineError::TargetUnreachable(_) => ErrorKind::TargetUnreachable,
            EngineError::ChainBroken(_) => ErrorKind::ChainBroken,
            EngineError::NoBackupAvailable { .. } => ErrorKind::NoBackupAvailable,
            EngineError::StorageWriteFailed(_) => ErrorKind::StorageWriteFailed,
            EngineError::StorageReadFailed(_) => ErrorKind::StorageReadFailed,
            EngineError::ArtifactNotFound(_) => ErrorKind::ArtifactNotFound,
            EngineError::RestoreJobNotFound(_) => ErrorKind::RestoreJobNotFound,
            EngineError::HasDependents(_) => ErrorKind::HasDependents,
            EngineError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            EngineError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                "Internal engine error".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            kind: self.kind(),
            message,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_carries_kind_and_message() {
        let body = EngineError::BackupInProgress("site-1".into()).to_body();
        assert_eq!(body.kind, ErrorKind::BackupInProgress);
        assert!(body.message.contains("site-1"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "backup_in_progress");
    }

    #[test]
    fn test_internal_error_is_masked() {
        let body = EngineError::Internal(anyhow::anyhow!("pool exhausted")).to_body();
        assert_eq!(body.kind, ErrorKind::Internal);
        assert!(!body.message.contains("pool"));
    }
}
