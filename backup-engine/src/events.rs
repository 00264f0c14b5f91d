//! Fire-and-forget notifications of terminal transitions.
//!
//! Delivery (mail, chat, webhooks) happens in subscribers outside the engine.
//! Events published while nobody is subscribed are dropped; the stored
//! artifact and job records stay the source of truth.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::backup_artifact::ArtifactKind;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    BackupCompleted {
        artifact_id: String,
        target_id: String,
        kind: ArtifactKind,
        size_bytes: i64,
    },
    BackupFailed {
        artifact_id: String,
        target_id: String,
        error: String,
    },
    RestoreCompleted {
        job_id: String,
        target_id: String,
    },
    RestoreFailed {
        job_id: String,
        target_id: String,
        error: String,
        failed_step: Option<i64>,
    },
}

impl EngineEvent {
    pub fn target_id(&self) -> &str {
        match self {
            EngineEvent::BackupCompleted { target_id, .. }
            | EngineEvent::BackupFailed { target_id, .. }
            | EngineEvent::RestoreCompleted { target_id, .. }
            | EngineEvent::RestoreFailed { target_id, .. } => target_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        tracing::debug!(target_id = event.target_id(), "Publishing engine event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
