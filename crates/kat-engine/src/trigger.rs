//! Trigger dispatch
//!
//! Each trigger kind has exactly one handler. Adding a kind means adding a
//! variant to [`Trigger`] and an arm to [`fire`].

use crate::capability::{AgentManager, ResourceStore};
use crate::error::TriggerError;
use kat_scenario::{CreateResource, KillAgent, ResourcePatch, Trigger};
use std::sync::Arc;

/// Collaborators a trigger may act through
#[derive(Clone)]
pub struct TriggerContext {
    /// Resource store of the target cluster
    pub store: Arc<dyn ResourceStore>,
    /// Agent lifecycle control
    pub agents: Arc<dyn AgentManager>,
}

impl std::fmt::Debug for TriggerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerContext").finish_non_exhaustive()
    }
}

/// Apply a trigger
///
/// # Errors
/// The collaborator error of the handler, or `TriggerError::Unsupported`
/// for a kind without a handler
pub async fn fire(trigger: &Trigger, ctx: &TriggerContext) -> Result<(), TriggerError> {
    tracing::info!(kind = trigger.kind(), "firing trigger");
    match trigger {
        Trigger::Patch(patch) => apply_patch(patch, ctx).await,
        Trigger::CreateResource(create) => create_resource(create, ctx).await,
        Trigger::KillAgent(kill) => kill_agent(kill, ctx).await,
        other => Err(TriggerError::Unsupported(other.kind())),
    }
}

async fn apply_patch(patch: &ResourcePatch, ctx: &TriggerContext) -> Result<(), TriggerError> {
    tracing::debug!(resource = %patch.target, "patching resource");
    ctx.store.patch(&patch.target, patch.document()).await?;
    Ok(())
}

async fn create_resource(create: &CreateResource, ctx: &TriggerContext) -> Result<(), TriggerError> {
    let resource = create.reference()?;
    tracing::debug!(%resource, "creating resource");
    ctx.store
        .create_or_update(&resource, create.document.clone())
        .await?;
    Ok(())
}

async fn kill_agent(kill: &KillAgent, ctx: &TriggerContext) -> Result<(), TriggerError> {
    tracing::debug!(agent = %kill.agent, "stopping agent");
    ctx.agents.stop(&kill.agent).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MockAgentManager, MockResourceStore};
    use crate::error::{AgentError, StoreError};
    use kat_scenario::{DocumentError, ResourceRef};
    use mockall::predicate::eq;
    use serde_json::json;

    fn ctx(store: MockResourceStore, agents: MockAgentManager) -> TriggerContext {
        TriggerContext {
            store: Arc::new(store),
            agents: Arc::new(agents),
        }
    }

    #[tokio::test]
    async fn patch_merges_spec_into_target() {
        let target = ResourceRef::new("apps/v1", "Deployment", "target").in_namespace("team-a");
        let mut store = MockResourceStore::new();
        store
            .expect_patch()
            .with(eq(target.clone()), eq(json!({"spec": {"replicas": 10}})))
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_create_or_update().never();

        let trigger = Trigger::from(ResourcePatch::new(target).with_spec(json!({"replicas": 10})));
        fire(&trigger, &ctx(store, MockAgentManager::new())).await.unwrap();
    }

    #[tokio::test]
    async fn create_resource_uses_document_identity() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "quota", "namespace": "team-a"},
            "data": {"limit": "5"}
        });
        let expected = ResourceRef::new("v1", "ConfigMap", "quota").in_namespace("team-a");
        let mut store = MockResourceStore::new();
        store
            .expect_create_or_update()
            .with(eq(expected), eq(doc.clone()))
            .times(1)
            .returning(|_, _| Ok(()));

        let trigger = Trigger::from(CreateResource::new(doc));
        fire(&trigger, &ctx(store, MockAgentManager::new())).await.unwrap();
    }

    #[tokio::test]
    async fn create_resource_without_identity_fails_before_store() {
        let mut store = MockResourceStore::new();
        store.expect_create_or_update().never();

        let trigger = Trigger::from(CreateResource::new(json!({"kind": "ConfigMap"})));
        let err = fire(&trigger, &ctx(store, MockAgentManager::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TriggerError::Document(DocumentError::MissingField("apiVersion"))
        ));
    }

    #[tokio::test]
    async fn kill_agent_stops_named_agent() {
        let mut agents = MockAgentManager::new();
        agents
            .expect_stop()
            .withf(|agent| agent == "quota-agent")
            .times(1)
            .returning(|_| Ok(()));

        let trigger = Trigger::from(KillAgent::new("quota-agent"));
        fire(&trigger, &ctx(MockResourceStore::new(), agents)).await.unwrap();
    }

    #[tokio::test]
    async fn store_rejection_propagates() {
        let mut store = MockResourceStore::new();
        store.expect_patch().returning(|r, _| {
            Err(StoreError::Rejected {
                resource: r.clone(),
                message: "immutable field".to_string(),
            })
        });

        let trigger = Trigger::from(ResourcePatch::new(ResourceRef::new("v1", "Pod", "p")));
        let err = fire(&trigger, &ctx(store, MockAgentManager::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Store(StoreError::Rejected { .. })));
    }

    #[tokio::test]
    async fn agent_failure_propagates() {
        let mut agents = MockAgentManager::new();
        agents
            .expect_stop()
            .returning(|a| Err(AgentError::NotDeployed(a.to_string())));

        let trigger = Trigger::from(KillAgent::new("ghost"));
        let err = fire(&trigger, &ctx(MockResourceStore::new(), agents))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "agent \"ghost\" is not deployed");
    }
}
