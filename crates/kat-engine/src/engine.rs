//! Scenario orchestrator
//!
//! Runs one scenario through a fixed sequence of stages:
//!
//! ```text
//! Setup -> Deployment -> Trigger -> Assertion -> Passed | Failed
//! ```
//!
//! The first failure in setup, deployment or trigger ends the run. Only the
//! assertion stage retries. Agents deployed by the run are stopped on every
//! exit path before the result is returned.

use crate::capability::{
    ActivitySource, AgentManager, ClusterConnection, ManifestSource, ResourceStore,
};
use crate::config::EngineConfig;
use crate::diagnostics::{DiagnosticsCoordinator, DiagnosticsReport, DiagnosticsScope};
use crate::error::{
    ConvergenceError, ManifestError, ScenarioError, SetupError, Stage, StoreError,
};
use crate::lease::AgentLease;
use crate::manifest::FileManifestSource;
use crate::poller::ConvergencePoller;
use crate::trigger::{self, TriggerContext};
use kat_scenario::{ResourceRef, Scenario};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one scenario run
///
/// `passed` holds exactly when both `error` and `diagnostics` are unset.
#[derive(Debug)]
pub struct ScenarioResult {
    /// Scenario name
    pub scenario: String,
    /// Whether every stage succeeded
    pub passed: bool,
    /// Wall time from run start to terminal state
    pub duration: Duration,
    /// Stage-tagged failure cause
    pub error: Option<ScenarioError>,
    /// Evidence gathered after a convergence failure
    pub diagnostics: Option<DiagnosticsReport>,
}

impl ScenarioResult {
    fn pass(scenario: &str, duration: Duration) -> Self {
        Self {
            scenario: scenario.to_string(),
            passed: true,
            duration,
            error: None,
            diagnostics: None,
        }
    }

    fn fail(
        scenario: &str,
        duration: Duration,
        error: ScenarioError,
        diagnostics: Option<DiagnosticsReport>,
    ) -> Self {
        Self {
            scenario: scenario.to_string(),
            passed: false,
            duration,
            error: Some(error),
            diagnostics,
        }
    }

    /// Stage the run failed in
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        self.error.as_ref().map(ScenarioError::stage)
    }

    /// Check the pass flag agrees with the error and diagnostics fields
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.passed == (self.error.is_none() && self.diagnostics.is_none())
    }
}

impl std::fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let took = humantime::format_duration(self.duration);
        match &self.error {
            None => write!(f, "PASS {} ({took})", self.scenario),
            Some(err) => write!(f, "FAIL {} ({took}): {err}", self.scenario),
        }
    }
}

/// Executes scenarios against one cluster
///
/// Holds no per-run state; one engine may run many scenarios concurrently.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ResourceStore>,
    agents: Arc<dyn AgentManager>,
    manifests: Arc<dyn ManifestSource>,
    poller: ConvergencePoller,
    diagnostics: DiagnosticsCoordinator,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("poller", &self.poller)
            .field("diagnostics", &self.diagnostics)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create engine over explicit collaborators
    ///
    /// Setup manifests are read from the filesystem until
    /// [`Engine::with_manifest_source`] replaces the source.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        agents: Arc<dyn AgentManager>,
        config: EngineConfig,
    ) -> Self {
        let poller = ConvergencePoller::new(Arc::clone(&store), config.poll_interval);
        let diagnostics = DiagnosticsCoordinator::new(Arc::clone(&agents))
            .with_output_limit(config.max_output_bytes)
            .with_time_limit(config.diagnostics_timeout);
        Self {
            store,
            agents,
            manifests: Arc::new(FileManifestSource::new()),
            poller,
            diagnostics,
            config,
        }
    }

    /// Create engine over a cluster connection
    ///
    /// The resource store is built once here and shared by every run.
    ///
    /// # Errors
    /// `StoreError` if the connection cannot produce a store
    pub fn connect(
        cluster: &dyn ClusterConnection,
        agents: Arc<dyn AgentManager>,
        config: EngineConfig,
    ) -> Result<Self, StoreError> {
        let store = cluster.resource_store()?;
        tracing::info!(cluster = cluster.name(), "connected to cluster");
        Ok(Self::new(store, agents, config))
    }

    /// With activity source for diagnostics
    #[must_use]
    pub fn with_activity_source(mut self, source: Arc<dyn ActivitySource>) -> Self {
        self.diagnostics = self.diagnostics.with_activity_source(source);
        self
    }

    /// With manifest source for setup
    #[must_use]
    pub fn with_manifest_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.manifests = source;
        self
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a scenario to completion
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        self.run_with_cancel(scenario, CancellationToken::new()).await
    }

    /// Run several scenarios concurrently against the shared store
    ///
    /// Results are returned in input order.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioResult> {
        futures::future::join_all(scenarios.iter().map(|s| self.run(s))).await
    }

    /// Run a scenario, stopping early if `cancel` fires
    ///
    /// Cancellation before the convergence wait fails the run with
    /// `ScenarioError::Cancelled`; during the wait it fails as a convergence
    /// timeout and diagnostics get [`crate::CANCEL_GRACE`] to finish. An agent
    /// deploy already in flight is allowed to finish so it can be stopped.
    /// Deployed agents are stopped either way.
    #[tracing::instrument(skip_all, fields(scenario = %scenario.name))]
    pub async fn run_with_cancel(
        &self,
        scenario: &Scenario,
        cancel: CancellationToken,
    ) -> ScenarioResult {
        let start = Instant::now();
        let mut lease = AgentLease::new(Arc::clone(&self.agents));

        let outcome = self.execute(scenario, &mut lease, &cancel).await;

        let diagnostics = match &outcome {
            Err(ScenarioError::Convergence(err)) => {
                Some(self.diagnose(scenario, err, &cancel).await)
            }
            _ => None,
        };
        lease.release().await;

        let duration = start.elapsed();
        match outcome {
            Ok(()) => {
                tracing::info!(?duration, "scenario passed");
                ScenarioResult::pass(&scenario.name, duration)
            }
            Err(error) => {
                tracing::warn!(stage = %error.stage(), %error, ?duration, "scenario failed");
                ScenarioResult::fail(&scenario.name, duration, error, diagnostics)
            }
        }
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        lease: &mut AgentLease,
        cancel: &CancellationToken,
    ) -> Result<(), ScenarioError> {
        guarded(Stage::Setup, cancel, self.setup(scenario)).await?;
        deploy_agents(scenario, lease, cancel).await?;
        guarded(Stage::Trigger, cancel, self.fire_trigger(scenario)).await?;

        let timeout = self.timeout_for(scenario);
        tracing::debug!(
            stage = %Stage::Assertion,
            ?timeout,
            expectations = scenario.expect.len(),
            "awaiting convergence"
        );
        let converged = self.poller.wait(&scenario.expect, timeout, cancel).await?;
        tracing::debug!(checks = converged.checks, elapsed = ?converged.elapsed, "converged");
        Ok(())
    }

    async fn setup(&self, scenario: &Scenario) -> Result<(), ScenarioError> {
        for manifest in &scenario.setup.manifests {
            tracing::debug!(stage = %Stage::Setup, %manifest, "applying manifest");
            self.apply_manifest(manifest)
                .await
                .map_err(|source| ScenarioError::Setup {
                    manifest: manifest.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<(), SetupError> {
        let documents = self.manifests.load(manifest).await?;
        for (index, document) in documents.into_iter().enumerate() {
            let resource = ResourceRef::from_document(&document).map_err(|source| {
                ManifestError::Document {
                    path: manifest.into(),
                    index,
                    source,
                }
            })?;
            self.store
                .create_or_update(&resource, document)
                .await
                .map_err(|source| SetupError::Apply {
                    resource: resource.clone(),
                    source,
                })?;
            tracing::debug!(%resource, "resource applied");
        }
        Ok(())
    }

    async fn fire_trigger(&self, scenario: &Scenario) -> Result<(), ScenarioError> {
        let Some(trigger) = &scenario.trigger else {
            tracing::debug!(stage = %Stage::Trigger, "no trigger");
            return Ok(());
        };
        let ctx = TriggerContext {
            store: Arc::clone(&self.store),
            agents: Arc::clone(&self.agents),
        };
        trigger::fire(trigger, &ctx)
            .await
            .map_err(|source| ScenarioError::Trigger {
                trigger: trigger.kind(),
                source,
            })
    }

    async fn diagnose(
        &self,
        scenario: &Scenario,
        err: &ConvergenceError,
        cancel: &CancellationToken,
    ) -> DiagnosticsReport {
        let scope = DiagnosticsScope::for_scenario(scenario);
        let mismatches = err.last_mismatch().cloned().into_iter().collect();
        self.diagnostics.collect(&scope, mismatches, cancel).await
    }

    fn timeout_for(&self, scenario: &Scenario) -> Duration {
        scenario.effective_timeout(self.config.default_timeout)
    }
}

/// Deploy agents in order
///
/// Deploys are not raced against `cancel`: a deploy dropped mid-call could
/// leave a workload the lease never saw. Cancellation is checked between
/// agents instead.
async fn deploy_agents(
    scenario: &Scenario,
    lease: &mut AgentLease,
    cancel: &CancellationToken,
) -> Result<(), ScenarioError> {
    for agent in &scenario.agents {
        if cancel.is_cancelled() {
            tracing::info!(stage = %Stage::Deployment, "run cancelled");
            return Err(ScenarioError::Cancelled {
                stage: Stage::Deployment,
            });
        }
        lease
            .deploy(agent)
            .await
            .map_err(|source| ScenarioError::Deployment {
                agent: agent.clone(),
                source,
            })?;
    }
    Ok(())
}

async fn guarded<T>(
    stage: Stage,
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, ScenarioError>>,
) -> Result<T, ScenarioError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::info!(%stage, "run cancelled");
            Err(ScenarioError::Cancelled { stage })
        }
        out = work => out,
    }
}
