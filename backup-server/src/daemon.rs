use backup_engine::{EngineEvent, EngineState, RealTimeScheduler};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Runs the real-time scheduler until SIGINT/SIGTERM.
pub async fn serve(state: Arc<EngineState>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let events = tokio::spawn(log_events(state.clone(), cancel.clone()));

    let scheduler = RealTimeScheduler::new(state.clone()).await?;
    scheduler.start().await?;
    tracing::info!(
        providers = ?state.storage.provider_names(),
        default_provider = state.storage.default_provider(),
        "Backup daemon running"
    );

    shutdown_signal(cancel.clone()).await;

    tracing::info!("Shutting down...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    let _ = events.await;

    let active = state.registry.active_backups() + state.registry.active_restores();
    if active > 0 {
        tracing::warn!(active, "Stopping with work in flight; it will be marked failed on next start");
    }
    Ok(())
}

/// Notification delivery is out of the engine's hands; the daemon logs every
/// event so operators can see terminal transitions.
async fn log_events(state: Arc<EngineState>, cancel: CancellationToken) {
    let mut rx = state.events.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::BackupCompleted { artifact_id, target_id, kind, size_bytes } => {
            tracing::info!(%target_id, %artifact_id, %kind, size_bytes, "Backup completed");
        }
        EngineEvent::BackupFailed { artifact_id, target_id, error } => {
            tracing::error!(%target_id, %artifact_id, %error, "Backup failed");
        }
        EngineEvent::RestoreCompleted { job_id, target_id } => {
            tracing::info!(%target_id, %job_id, "Restore completed");
        }
        EngineEvent::RestoreFailed { job_id, target_id, error, failed_step } => {
            tracing::error!(%target_id, %job_id, %error, failed_step = ?failed_step, "Restore failed");
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
