use kat_engine::{
    AgentManager, ConvergenceError, Engine, EngineConfig, Observed, ScenarioError, Stage, WaitEnd,
};
use kat_scenario::{Expectation, KillAgent, Scenario};
use kat_test_utils::{
    deployment, deployment_ref, quota_config, scaling_respects_quota, seeded_store,
    InMemoryManifestSource, InMemoryResourceStore, RecordingAgentManager, StaticActivitySource,
    StaticClusterConnection,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config() -> EngineConfig {
    EngineConfig::default().with_poll_interval(Duration::from_secs(2))
}

fn engine(store: Arc<InMemoryResourceStore>, agents: Arc<RecordingAgentManager>) -> Engine {
    Engine::new(store, agents, config())
}

#[tokio::test(start_paused = true)]
async fn test_scaling_respects_quota_passes() {
    let store = seeded_store();
    store.evolve_after(
        deployment_ref("target"),
        3,
        json!({"spec": {"replicas": 5}, "status": {"readyReplicas": 5}}),
    );
    let agents = Arc::new(RecordingAgentManager::new());

    let result = engine(Arc::clone(&store), Arc::clone(&agents))
        .run(&scaling_respects_quota())
        .await;

    assert!(result.passed, "{result}");
    assert!(result.is_consistent());
    assert_eq!(result.scenario, "scaling-agent-respects-quota-agent");
    assert_eq!(result.duration, Duration::from_secs(4));
    assert_eq!(store.patch_count(), 1);
    assert_eq!(agents.deployed(), ["scaling-agent", "quota-agent"]);
    assert_eq!(agents.stopped(), ["quota-agent", "scaling-agent"]);
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scaling_past_quota_times_out_with_report() {
    let store = seeded_store();
    store.evolve_after(
        deployment_ref("target"),
        1,
        json!({"status": {"readyReplicas": 10}}),
    );
    let agents = Arc::new(RecordingAgentManager::new());
    agents.set_output("quota-agent", "quota exceeded, not enforcing");

    let result = engine(Arc::clone(&store), Arc::clone(&agents))
        .with_activity_source(Arc::new(StaticActivitySource::with_records(Vec::new())))
        .run(&scaling_respects_quota().with_timeout(Duration::from_secs(30)))
        .await;

    assert!(!result.passed);
    assert!(result.is_consistent());
    assert_eq!(result.stage(), Some(Stage::Assertion));
    assert!(result.duration <= Duration::from_secs(32));

    let Some(ScenarioError::Convergence(ConvergenceError::Timeout {
        reason,
        last_mismatch: Some(mismatch),
        ..
    })) = &result.error
    else {
        panic!("expected convergence timeout, got {:?}", result.error);
    };
    assert_eq!(*reason, WaitEnd::Deadline);
    assert_eq!(
        mismatch.to_string(),
        "deployment/target path .spec.replicas: got 10, want 5"
    );

    let report = result.diagnostics.as_ref().unwrap();
    assert_eq!(report.mismatches, vec![mismatch.clone()]);
    assert_eq!(
        report.agent_output["quota-agent"],
        "quota exceeded, not enforcing"
    );
    assert_eq!(report.agent_output["scaling-agent"], "");
    assert!(report.collection_error.is_none());
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_trigger_never_touches_store() {
    let store = seeded_store();
    let agents = Arc::new(RecordingAgentManager::new());
    let scenario = Scenario::new("observe-only", ["scaling-agent"]).with_expectation(
        Expectation::new(deployment_ref("target")).with_condition(".spec.replicas", 2),
    );

    let result = engine(Arc::clone(&store), agents).run(&scenario).await;

    assert!(result.passed, "{result}");
    assert_eq!(store.patch_count(), 0);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_setup_applies_manifests_in_order_and_is_idempotent() {
    let store = Arc::new(InMemoryResourceStore::new());
    let agents = Arc::new(RecordingAgentManager::new());
    let manifests = InMemoryManifestSource::new()
        .with_manifest("quota.yaml", vec![quota_config(5)])
        .with_manifest("target.yaml", vec![deployment("target", 2, 2)]);
    let engine = engine(Arc::clone(&store), agents).with_manifest_source(Arc::new(manifests));

    let scenario = Scenario::new("setup-only", ["quota-agent"])
        .with_manifest("quota.yaml")
        .with_manifest("target.yaml");

    assert!(engine.run(&scenario).await.passed);
    let once = store.get(&deployment_ref("target"));
    assert!(engine.run(&scenario).await.passed);

    assert_eq!(store.get(&deployment_ref("target")), once);
    assert_eq!(store.len(), 2);
    assert_eq!(store.write_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_deploys_nothing() {
    let store = Arc::new(InMemoryResourceStore::new());
    store.reject_writes("admission webhook denied");
    let agents = Arc::new(RecordingAgentManager::new());
    let manifests = InMemoryManifestSource::new().with_manifest("quota.yaml", vec![quota_config(5)]);

    let result = engine(store, Arc::clone(&agents))
        .with_manifest_source(Arc::new(manifests))
        .run(&scaling_respects_quota().with_manifest("quota.yaml"))
        .await;

    assert_eq!(result.stage(), Some(Stage::Setup));
    assert!(result.diagnostics.is_none());
    assert!(agents.deployed().is_empty());
    let err = result.error.unwrap();
    assert_eq!(
        err.to_string(),
        "setup: manifest quota.yaml: applying configmap/quota: \
         configmap/quota rejected: admission webhook denied"
    );
}

#[tokio::test(start_paused = true)]
async fn test_deployment_halts_at_first_failure_and_cleans_up() {
    let agents = Arc::new(RecordingAgentManager::new());
    agents.fail_deploy_of("quota-agent");
    let scenario = Scenario::new("three-agents", ["scaling-agent", "quota-agent", "audit-agent"]);

    let result = engine(seeded_store(), Arc::clone(&agents)).run(&scenario).await;

    assert_eq!(result.stage(), Some(Stage::Deployment));
    assert!(matches!(
        &result.error,
        Some(ScenarioError::Deployment { agent, .. }) if agent == "quota-agent"
    ));
    assert_eq!(agents.deployed(), ["scaling-agent"]);
    assert_eq!(agents.stopped(), ["scaling-agent"]);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_failure_cleans_up() {
    let store = Arc::new(InMemoryResourceStore::new());
    let agents = Arc::new(RecordingAgentManager::new());

    let result = engine(store, Arc::clone(&agents))
        .run(&scaling_respects_quota())
        .await;

    assert_eq!(result.stage(), Some(Stage::Trigger));
    assert!(result.diagnostics.is_none());
    assert!(agents.running().is_empty());
    assert_eq!(agents.stopped().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_kill_agent_trigger_is_tolerated_by_cleanup() {
    let agents = Arc::new(RecordingAgentManager::new());
    let scenario = Scenario::new("kill-quota", ["scaling-agent", "quota-agent"])
        .with_trigger(KillAgent::new("quota-agent"))
        .with_expectation(
            Expectation::new(deployment_ref("target")).with_condition(".spec.replicas", 2),
        );

    let result = engine(seeded_store(), Arc::clone(&agents)).run(&scenario).await;

    assert!(result.passed, "{result}");
    assert!(agents.running().is_empty());
    assert_eq!(agents.stopped(), ["quota-agent", "scaling-agent"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_poll_is_timeout_and_cleans_up() {
    let agents = Arc::new(RecordingAgentManager::new());
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let result = engine(seeded_store(), Arc::clone(&agents))
        .run_with_cancel(&scaling_respects_quota(), cancel)
        .await;

    assert!(!result.passed);
    assert_eq!(result.stage(), Some(Stage::Assertion));
    let err = result.error.as_ref().unwrap();
    assert!(err.is_cancelled());
    assert!(result.duration < Duration::from_secs(9));
    assert!(result.diagnostics.is_some());
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_slow_deploy_stops_deployed_agent() {
    let agents = Arc::new(RecordingAgentManager::new());
    agents.set_deploy_delay(Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let result = engine(seeded_store(), Arc::clone(&agents))
        .run_with_cancel(&scaling_respects_quota(), cancel)
        .await;

    assert!(matches!(
        result.error,
        Some(ScenarioError::Cancelled {
            stage: Stage::Deployment
        })
    ));
    assert!(result.duration >= Duration::from_secs(5));
    assert!(result.duration < Duration::from_secs(6));
    assert_eq!(agents.deployed(), ["scaling-agent"]);
    assert_eq!(agents.stopped(), ["scaling-agent"]);
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_run_mid_deploy_stops_agent() {
    let agents = Arc::new(RecordingAgentManager::new());
    agents.set_deploy_delay(Duration::from_secs(5));
    let engine = engine(seeded_store(), Arc::clone(&agents));

    let abandoned =
        tokio::time::timeout(Duration::from_secs(2), engine.run(&scaling_respects_quota())).await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(agents.deployed().is_empty());
    assert_eq!(agents.stopped(), ["scaling-agent"]);
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_diagnostics_end_soon_after_cancel() {
    let agents = Arc::new(RecordingAgentManager::new());
    agents.stall_output_of("quota-agent");
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        canceller.cancel();
    });

    let result = engine(seeded_store(), Arc::clone(&agents))
        .run_with_cancel(&scaling_respects_quota(), cancel)
        .await;

    assert_eq!(result.stage(), Some(Stage::Assertion));
    assert!(result.error.as_ref().unwrap().is_cancelled());
    assert!(result.duration < Duration::from_secs(12));
    let report = result.diagnostics.unwrap();
    assert_eq!(report.agent_output["scaling-agent"], "");
    assert_eq!(
        report.agent_output["quota-agent"],
        "<output unavailable: collection cut short>"
    );
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_diagnostics_bounded_by_config() {
    let agents = Arc::new(RecordingAgentManager::new());
    agents.stall_output_of("scaling-agent");
    let engine = Engine::new(
        seeded_store(),
        Arc::clone(&agents) as Arc<dyn AgentManager>,
        config().with_diagnostics_timeout(Duration::from_secs(3)),
    );

    let result = engine
        .run(&scaling_respects_quota().with_timeout(Duration::from_secs(10)))
        .await;

    assert_eq!(result.stage(), Some(Stage::Assertion));
    assert!(result.duration >= Duration::from_secs(13));
    assert!(result.duration < Duration::from_secs(15));
    assert!(result.diagnostics.unwrap().is_partial());
    assert!(agents.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_store_reports_fetch_failure() {
    let store = seeded_store();
    store.set_unavailable("connection refused");
    let agents = Arc::new(RecordingAgentManager::new());
    agents.fail_output_of("scaling-agent");
    let scenario = Scenario::new("observe", ["scaling-agent"])
        .with_expectation(
            Expectation::new(deployment_ref("target")).with_condition(".spec.replicas", 2),
        )
        .with_timeout(Duration::from_secs(5));

    let result = engine(store, agents)
        .with_activity_source(Arc::new(StaticActivitySource::failing("forbidden")))
        .run(&scenario)
        .await;

    let report = result.diagnostics.unwrap();
    assert!(matches!(
        report.mismatches[0].observed,
        Observed::FetchFailed(_)
    ));
    assert!(report.agent_output["scaling-agent"].starts_with("<output unavailable"));
    assert_eq!(
        report.collection_error.as_deref(),
        Some("listing activity in team-a: forbidden")
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_all_keeps_runs_independent() {
    let store = seeded_store();
    store.insert(deployment_ref("other"), deployment("other", 1, 1));
    let agents = Arc::new(RecordingAgentManager::new());
    let engine = engine(Arc::clone(&store), Arc::clone(&agents));

    let quick = Scenario::new("quick", ["a"]).with_expectation(
        Expectation::new(deployment_ref("other")).with_condition(".spec.replicas", 1),
    );
    let doomed = Scenario::new("doomed", ["b"])
        .with_expectation(
            Expectation::new(deployment_ref("target")).with_condition(".spec.replicas", 99),
        )
        .with_timeout(Duration::from_secs(10));

    let results = engine.run_all(&[quick, doomed]).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].passed);
    assert_eq!(results[1].stage(), Some(Stage::Assertion));
    assert!(results[0].duration < results[1].duration);
    assert!(results.iter().all(|r| r.is_consistent()));
    assert!(agents.running().is_empty());
}

#[tokio::test]
async fn test_connect_builds_store_once() {
    let store = seeded_store();
    let cluster = StaticClusterConnection::new("kind-kat", store);
    let agents = Arc::new(RecordingAgentManager::new());
    assert!(Engine::connect(&cluster, agents.clone(), config()).is_ok());

    let err = Engine::connect(&StaticClusterConnection::unreachable("gone"), agents, config())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "resource store unavailable: cluster gone unreachable"
    );
}
