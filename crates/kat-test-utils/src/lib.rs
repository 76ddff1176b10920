//! Testing utilities for KAT workspace
//!
//! In-memory stand-ins for the cluster capabilities plus scenario fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use kat_engine::{
    ActivityError, ActivityRecord, ActivitySource, AgentError, AgentManager, ClusterConnection,
    ManifestError, ManifestSource, ResourceStore, StoreError,
};
use kat_scenario::{Expectation, ResourcePatch, ResourceRef, Scenario};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Apply a JSON merge patch (RFC 7386) to `target`
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in fields {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

struct Evolution {
    resource: ResourceRef,
    after_fetches: u32,
    partial: Value,
}

#[derive(Default)]
struct StoreState {
    resources: HashMap<ResourceRef, Value>,
    evolutions: Vec<Evolution>,
    fetches: HashMap<ResourceRef, u32>,
    writes: u32,
    patches: u32,
    reject_writes: Option<String>,
    unavailable: Option<String>,
}

/// Resource store backed by a map
///
/// Writes merge like a real API server. Scripted evolutions stand in for
/// controllers and agents: each one is merged into its resource once the
/// resource has been fetched a given number of times.
#[derive(Default)]
pub struct InMemoryResourceStore {
    state: Mutex<StoreState>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource
    pub fn insert(&self, resource: ResourceRef, document: Value) {
        self.state.lock().resources.insert(resource, document);
    }

    /// Current document of a resource
    pub fn get(&self, resource: &ResourceRef) -> Option<Value> {
        self.state.lock().resources.get(resource).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge `partial` into `resource` once it has been fetched `fetches` times
    pub fn evolve_after(&self, resource: ResourceRef, fetches: u32, partial: Value) {
        self.state.lock().evolutions.push(Evolution {
            resource,
            after_fetches: fetches,
            partial,
        });
    }

    /// Reject every create-or-update and patch
    pub fn reject_writes(&self, message: impl Into<String>) {
        self.state.lock().reject_writes = Some(message.into());
    }

    /// Fail every fetch as if the API server were down
    pub fn set_unavailable(&self, message: impl Into<String>) {
        self.state.lock().unavailable = Some(message.into());
    }

    pub fn write_count(&self) -> u32 {
        self.state.lock().writes
    }

    pub fn patch_count(&self) -> u32 {
        self.state.lock().patches
    }

    pub fn fetch_count(&self, resource: &ResourceRef) -> u32 {
        self.state.lock().fetches.get(resource).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn create_or_update(&self, resource: &ResourceRef, document: Value) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.reject_writes {
            return Err(StoreError::Rejected {
                resource: resource.clone(),
                message: message.clone(),
            });
        }
        state.writes += 1;
        state.resources.insert(resource.clone(), document);
        Ok(())
    }

    async fn patch(&self, resource: &ResourceRef, partial: Value) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.reject_writes {
            return Err(StoreError::Rejected {
                resource: resource.clone(),
                message: message.clone(),
            });
        }
        let Some(current) = state.resources.get_mut(resource) else {
            return Err(StoreError::NotFound(resource.clone()));
        };
        merge_patch(current, &partial);
        state.patches += 1;
        Ok(())
    }

    async fn fetch(&self, resource: &ResourceRef) -> Result<Value, StoreError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.unavailable {
            return Err(StoreError::Unavailable(message.clone()));
        }

        let count = state.fetches.entry(resource.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        let StoreState {
            resources,
            evolutions,
            ..
        } = &mut *state;
        evolutions.retain(|e| {
            if e.resource != *resource || e.after_fetches > count {
                return true;
            }
            let doc = resources.entry(e.resource.clone()).or_insert(Value::Null);
            merge_patch(doc, &e.partial);
            false
        });

        resources
            .get(resource)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(resource.clone()))
    }
}

#[derive(Default)]
struct AgentState {
    running: Vec<String>,
    deployed: Vec<String>,
    stopped: Vec<String>,
    fail_deploy: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_output: HashSet<String>,
    stall_output: HashSet<String>,
    outputs: HashMap<String, String>,
    deploy_delay: Duration,
}

/// Agent manager that records lifecycle calls
#[derive(Default)]
pub struct RecordingAgentManager {
    state: Mutex<AgentState>,
}

impl RecordingAgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deploy_of(&self, agent: &str) {
        self.state.lock().fail_deploy.insert(agent.to_string());
    }

    pub fn fail_stop_of(&self, agent: &str) {
        self.state.lock().fail_stop.insert(agent.to_string());
    }

    pub fn fail_output_of(&self, agent: &str) {
        self.state.lock().fail_output.insert(agent.to_string());
    }

    /// Make output requests for `agent` never answer
    pub fn stall_output_of(&self, agent: &str) {
        self.state.lock().stall_output.insert(agent.to_string());
    }

    /// Wait this long after creating each agent before reporting it ready
    pub fn set_deploy_delay(&self, delay: Duration) {
        self.state.lock().deploy_delay = delay;
    }

    pub fn set_output(&self, agent: &str, output: impl Into<String>) {
        self.state.lock().outputs.insert(agent.to_string(), output.into());
    }

    /// Agents deployed, in call order
    pub fn deployed(&self) -> Vec<String> {
        self.state.lock().deployed.clone()
    }

    /// Agents stopped, in call order
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }

    /// Agents currently running
    pub fn running(&self) -> Vec<String> {
        self.state.lock().running.clone()
    }
}

#[async_trait]
impl AgentManager for RecordingAgentManager {
    async fn deploy(&self, agent: &str) -> Result<(), AgentError> {
        let delay = {
            let mut state = self.state.lock();
            if state.fail_deploy.contains(agent) {
                return Err(AgentError::Failed {
                    agent: agent.to_string(),
                    message: "image pull failed".to_string(),
                });
            }
            state.running.push(agent.to_string());
            state.deploy_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().deployed.push(agent.to_string());
        Ok(())
    }

    async fn stop(&self, agent: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock();
        let Some(pos) = state.running.iter().position(|a| a == agent) else {
            return Err(AgentError::NotDeployed(agent.to_string()));
        };
        if state.fail_stop.contains(agent) {
            return Err(AgentError::Failed {
                agent: agent.to_string(),
                message: "termination timed out".to_string(),
            });
        }
        state.running.remove(pos);
        state.stopped.push(agent.to_string());
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), AgentError> {
        let mut state = self.state.lock();
        let running = std::mem::take(&mut state.running);
        state.stopped.extend(running);
        Ok(())
    }

    async fn recent_output(&self, agent: &str) -> Result<String, AgentError> {
        {
            let state = self.state.lock();
            if state.fail_output.contains(agent) {
                return Err(AgentError::Failed {
                    agent: agent.to_string(),
                    message: "log stream closed".to_string(),
                });
            }
            if !state.stall_output.contains(agent) {
                return Ok(state.outputs.get(agent).cloned().unwrap_or_default());
            }
        }
        std::future::pending::<Result<String, AgentError>>().await
    }
}

/// Activity source returning a fixed answer
pub struct StaticActivitySource {
    answer: Result<Vec<ActivityRecord>, String>,
}

impl StaticActivitySource {
    pub fn with_records(records: Vec<ActivityRecord>) -> Self {
        Self { answer: Ok(records) }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            answer: Err(message.into()),
        }
    }
}

#[async_trait]
impl ActivitySource for StaticActivitySource {
    async fn recent_activity(&self, namespace: &str) -> Result<Vec<ActivityRecord>, ActivityError> {
        self.answer.clone().map_err(|message| ActivityError {
            namespace: namespace.to_string(),
            message,
        })
    }
}

/// Manifest source backed by a map of reference to documents
#[derive(Default)]
pub struct InMemoryManifestSource {
    manifests: HashMap<String, Vec<Value>>,
}

impl InMemoryManifestSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_manifest(mut self, reference: &str, documents: Vec<Value>) -> Self {
        self.manifests.insert(reference.to_string(), documents);
        self
    }
}

#[async_trait]
impl ManifestSource for InMemoryManifestSource {
    async fn load(&self, reference: &str) -> Result<Vec<Value>, ManifestError> {
        self.manifests
            .get(reference)
            .cloned()
            .ok_or_else(|| ManifestError::Io {
                path: reference.into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }
}

/// Cluster connection handing out a fixed store
pub struct StaticClusterConnection {
    name: String,
    store: Option<Arc<dyn ResourceStore>>,
}

impl StaticClusterConnection {
    pub fn new(name: &str, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            name: name.to_string(),
            store: Some(store),
        }
    }

    pub fn unreachable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: None,
        }
    }
}

impl ClusterConnection for StaticClusterConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_store(&self) -> Result<Arc<dyn ResourceStore>, StoreError> {
        self.store
            .clone()
            .ok_or_else(|| StoreError::Unavailable(format!("cluster {} unreachable", self.name)))
    }
}

/// Deployment reference in namespace `team-a`
pub fn deployment_ref(name: &str) -> ResourceRef {
    ResourceRef::new("apps/v1", "Deployment", name).in_namespace("team-a")
}

/// Deployment document with the given desired and ready replicas
pub fn deployment(name: &str, replicas: i64, ready: i64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": "team-a"},
        "spec": {"replicas": replicas},
        "status": {"readyReplicas": ready}
    })
}

/// Quota config map document
pub fn quota_config(limit: i64) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "quota", "namespace": "team-a"},
        "data": {"maxReplicas": limit.to_string()}
    })
}

/// Scaling agent asked for 10 replicas; the quota agent must cap it at 5
pub fn scaling_respects_quota() -> Scenario {
    Scenario::new(
        "scaling-agent-respects-quota-agent",
        ["scaling-agent", "quota-agent"],
    )
    .with_trigger(ResourcePatch::new(deployment_ref("target")).with_spec(json!({"replicas": 10})))
    .with_expectation(
        Expectation::new(deployment_ref("target"))
            .with_condition(".spec.replicas", 5)
            .with_condition(".status.readyReplicas", 5),
    )
    .with_timeout(Duration::from_secs(120))
}

/// In-memory store seeded with the `target` deployment at 2 replicas
pub fn seeded_store() -> Arc<InMemoryResourceStore> {
    let store = InMemoryResourceStore::new();
    store.insert(deployment_ref("target"), deployment("target", 2, 2));
    Arc::new(store)
}
