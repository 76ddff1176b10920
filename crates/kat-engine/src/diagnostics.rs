//! Diagnostics coordinator
//!
//! Assembles a best-effort evidence bundle after a failed run. Gathering
//! never fails: a diagnostics problem must not mask the test failure it is
//! describing, so every collection error is folded into the report itself.

use crate::capability::{ActivityRecord, ActivitySource, AgentManager};
use crate::poller::Mismatch;
use futures::future::BoxFuture;
use futures::FutureExt;
use kat_scenario::{Scenario, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default cap on captured output per agent (bytes, tail kept)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Default bound on one whole diagnostics collection
pub const DEFAULT_DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(30);

/// How long collection continues once the run is cancelled
pub const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// What to gather diagnostics for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsScope {
    /// Namespace for activity records
    pub namespace: String,
    /// Agents whose output is captured
    pub agents: Vec<String>,
}

impl DiagnosticsScope {
    /// Scope for a scenario
    ///
    /// The namespace is the first one named by an expectation, then the
    /// trigger's, then [`DEFAULT_NAMESPACE`].
    #[must_use]
    pub fn for_scenario(scenario: &Scenario) -> Self {
        let namespace = scenario
            .expect
            .iter()
            .map(|e| e.resource.namespace.as_str())
            .find(|ns| !ns.is_empty())
            .map(str::to_string)
            .or_else(|| scenario.trigger.as_ref().and_then(|t| t.namespace()))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Self {
            namespace,
            agents: scenario.agents.clone(),
        }
    }
}

/// Evidence gathered for a failed run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Agent name to captured output (or an inline placeholder)
    pub agent_output: BTreeMap<String, String>,
    /// Recent cluster activity in the scenario namespace
    pub activity: Vec<ActivityRecord>,
    /// Last observed per-condition mismatches
    pub mismatches: Vec<Mismatch>,
    /// Set when gathering itself partially failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_error: Option<String>,
}

impl DiagnosticsReport {
    /// Check if anything failed while gathering
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.collection_error.is_some()
            || self
                .agent_output
                .values()
                .any(|o| o.starts_with(OUTPUT_UNAVAILABLE))
    }
}

impl std::fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(err) = &self.collection_error {
            writeln!(f, "diagnostics collection error: {err}")?;
        }
        for m in &self.mismatches {
            writeln!(f, "mismatch: {m}")?;
        }
        for record in &self.activity {
            writeln!(f, "activity: {record}")?;
        }
        for (agent, output) in &self.agent_output {
            writeln!(f, "--- agent {agent} output ---")?;
            writeln!(f, "{output}")?;
        }
        Ok(())
    }
}

const OUTPUT_UNAVAILABLE: &str = "<output unavailable";

/// Gathers diagnostics from agent and activity collaborators
#[derive(Clone)]
pub struct DiagnosticsCoordinator {
    agents: Arc<dyn AgentManager>,
    activity: Option<Arc<dyn ActivitySource>>,
    max_output_bytes: usize,
    time_limit: Duration,
}

impl std::fmt::Debug for DiagnosticsCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsCoordinator")
            .field("has_activity_source", &self.activity.is_some())
            .field("max_output_bytes", &self.max_output_bytes)
            .field("time_limit", &self.time_limit)
            .finish_non_exhaustive()
    }
}

impl DiagnosticsCoordinator {
    /// Create coordinator without an activity source
    #[must_use]
    pub fn new(agents: Arc<dyn AgentManager>) -> Self {
        Self {
            agents,
            activity: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            time_limit: DEFAULT_DIAGNOSTICS_TIMEOUT,
        }
    }

    /// With activity source
    #[inline]
    #[must_use]
    pub fn with_activity_source(mut self, source: Arc<dyn ActivitySource>) -> Self {
        self.activity = Some(source);
        self
    }

    /// With per-agent output cap; zero disables truncation
    #[inline]
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// With bound on the whole collection
    #[inline]
    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Gather a report; never fails
    ///
    /// Collection stops at the time limit, or [`CANCEL_GRACE`] after `cancel`
    /// fires. Anything not gathered by then is recorded as unavailable.
    pub async fn collect(
        &self,
        scope: &DiagnosticsScope,
        mismatches: Vec<Mismatch>,
        cancel: &CancellationToken,
    ) -> DiagnosticsReport {
        let mut report = DiagnosticsReport {
            mismatches,
            ..DiagnosticsReport::default()
        };
        let mut budget = Budget::new(self.time_limit, cancel);

        for agent in &scope.agents {
            let output = match budget.run(self.agents.recent_output(agent)).await {
                Some(Ok(out)) => tail(out, self.max_output_bytes),
                Some(Err(e)) => {
                    tracing::warn!(agent = %agent, error = %e, "agent output unavailable");
                    format!("{OUTPUT_UNAVAILABLE}: {e}>")
                }
                None => format!("{OUTPUT_UNAVAILABLE}: {CUT_SHORT}>"),
            };
            report.agent_output.insert(agent.clone(), output);
        }

        if let Some(source) = &self.activity {
            match budget.run(source.recent_activity(&scope.namespace)).await {
                Some(Ok(records)) => report.activity = records,
                Some(Err(e)) => {
                    tracing::warn!(namespace = %scope.namespace, error = %e, "activity unavailable");
                    report.collection_error = Some(e.to_string());
                }
                None => {
                    report.collection_error =
                        Some(format!("listing activity in {}: {CUT_SHORT}", scope.namespace));
                }
            }
        }

        if budget.expired {
            tracing::warn!(limit = ?self.time_limit, "diagnostics collection cut short");
        }

        tracing::debug!(
            agents = report.agent_output.len(),
            activity = report.activity.len(),
            mismatches = report.mismatches.len(),
            partial = report.is_partial(),
            "diagnostics collected"
        );
        report
    }
}

const CUT_SHORT: &str = "collection cut short";

/// Shared cutoff for every fetch in one collection
///
/// Fires at the time limit or [`CANCEL_GRACE`] after cancellation. Once
/// fired, later fetches are skipped.
struct Budget<'a> {
    cutoff: BoxFuture<'a, ()>,
    expired: bool,
}

impl<'a> Budget<'a> {
    fn new(limit: Duration, cancel: &'a CancellationToken) -> Self {
        let cutoff = async move {
            tokio::select! {
                () = tokio::time::sleep(limit) => {}
                () = async {
                    cancel.cancelled().await;
                    tokio::time::sleep(CANCEL_GRACE).await;
                } => {}
            }
        }
        .boxed();
        Self {
            cutoff,
            expired: false,
        }
    }

    async fn run<T>(&mut self, work: impl Future<Output = T>) -> Option<T> {
        if self.expired {
            return None;
        }
        let out = tokio::select! {
            biased;
            out = work => Some(out),
            () = &mut self.cutoff => None,
        };
        self.expired = out.is_none();
        out
    }
}

/// Keep the last `max` bytes of `output`, on a char boundary
fn tail(output: String, max: usize) -> String {
    if max == 0 || output.len() <= max {
        return output;
    }
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("...[truncated]\n{}", &output[start..])
}
