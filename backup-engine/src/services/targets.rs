use crate::db::connection::with_conn;
use crate::error::{EngineError, EngineResult};
use crate::models::target::{self, CreateTargetRequest, ManagedTarget};
use crate::state::EngineState;

pub async fn register_target(state: &EngineState, req: CreateTargetRequest) -> EngineResult<ManagedTarget> {
    if req.name.trim().is_empty() {
        return Err(EngineError::InvalidConfig("target name must not be empty".into()));
    }
    if req.root_path.trim().is_empty() {
        return Err(EngineError::InvalidConfig("target root path must not be empty".into()));
    }
    if let Some(id) = req.id.as_deref() {
        let existing = id.to_string();
        if with_conn(&state.db, move |conn| target::find_by_id(conn, &existing)).await?.is_some() {
            return Err(EngineError::InvalidConfig(format!("target {} already exists", id)));
        }
    }

    let created = with_conn(&state.db, move |conn| target::create(conn, &req)).await?;
    tracing::info!(target_id = %created.id, name = %created.name, "Target registered");
    Ok(created)
}

pub async fn list_targets(state: &EngineState) -> EngineResult<Vec<ManagedTarget>> {
    Ok(with_conn(&state.db, target::find_all).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEngine;

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_blank_fields() -> anyhow::Result<()> {
        let engine = TestEngine::new()?;

        let err = register_target(
            &engine.state,
            CreateTargetRequest {
                id: Some("site".into()),
                name: "again".into(),
                root_path: "/srv/site".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let err = register_target(
            &engine.state,
            CreateTargetRequest {
                id: None,
                name: " ".into(),
                root_path: "/srv/x".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let created = register_target(
            &engine.state,
            CreateTargetRequest {
                id: None,
                name: "Shop".into(),
                root_path: "/srv/shop".into(),
            },
        )
        .await?;
        assert!(!created.id.is_empty());
        assert_eq!(list_targets(&engine.state).await?.len(), 2);
        Ok(())
    }
}
