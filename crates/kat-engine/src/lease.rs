//! Agent lease
//!
//! Tracks the agents deployed by one scenario run and stops them when the
//! run ends, whatever way it ends. Only agents deployed through the lease are
//! stopped, so concurrent runs sharing an agent manager never stop each
//! other's agents.

use crate::capability::AgentManager;
use crate::error::AgentError;
use std::sync::Arc;

/// Guard over the agents deployed by one run
///
/// Call [`AgentLease::release`] on every normal exit. If the lease is
/// dropped unreleased (the run future was cancelled or panicked), cleanup is
/// spawned on the current runtime instead.
pub struct AgentLease {
    agents: Arc<dyn AgentManager>,
    deployed: Vec<String>,
    in_flight: Option<String>,
    released: bool,
}

impl std::fmt::Debug for AgentLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLease")
            .field("deployed", &self.deployed)
            .field("in_flight", &self.in_flight)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl AgentLease {
    /// Create an empty lease
    #[must_use]
    pub fn new(agents: Arc<dyn AgentManager>) -> Self {
        Self {
            agents,
            deployed: Vec::new(),
            in_flight: None,
            released: false,
        }
    }

    /// Deploy an agent and record it for cleanup
    ///
    /// If this future is dropped before the manager answers, the agent is
    /// still stopped when the lease drops.
    ///
    /// # Errors
    /// The agent manager's error; the agent is not recorded
    pub async fn deploy(&mut self, agent: &str) -> Result<(), AgentError> {
        self.in_flight = Some(agent.to_string());
        let outcome = self.agents.deploy(agent).await;
        self.in_flight = None;
        outcome?;
        tracing::info!(agent, "agent deployed");
        self.deployed.push(agent.to_string());
        Ok(())
    }

    /// Agents deployed so far, in deployment order
    #[inline]
    #[must_use]
    pub fn deployed(&self) -> &[String] {
        &self.deployed
    }

    /// Stop every deployed agent, most recent first
    ///
    /// Stop failures are logged and do not interrupt cleanup.
    pub async fn release(mut self) {
        self.released = true;
        let deployed = std::mem::take(&mut self.deployed);
        stop_in_reverse(self.agents.as_ref(), deployed).await;
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut deployed = std::mem::take(&mut self.deployed);
        deployed.extend(self.in_flight.take());
        if deployed.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(agents = deployed.len(), "lease dropped unreleased, spawning cleanup");
                let agents = Arc::clone(&self.agents);
                handle.spawn(async move { stop_in_reverse(agents.as_ref(), deployed).await });
            }
            Err(_) => {
                tracing::error!(?deployed, "lease dropped outside a runtime, agents left running");
            }
        }
    }
}

async fn stop_in_reverse(agents: &dyn AgentManager, deployed: Vec<String>) {
    for agent in deployed.iter().rev() {
        match agents.stop(agent).await {
            Ok(()) => tracing::debug!(agent = %agent, "agent stopped"),
            Err(e) => tracing::warn!(agent = %agent, error = %e, "failed to stop agent"),
        }
    }
}
