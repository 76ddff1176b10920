//! Error types for the scenario engine
//!
//! Failures are classified by the stage they occurred in:
//! - Setup: a manifest could not be loaded or applied
//! - Deployment: an agent could not be deployed
//! - Trigger: the triggering mutation could not be applied
//! - Assertion: the cluster did not converge
//!
//! Collaborator errors (`StoreError`, `AgentError`, `ManifestError`) are
//! produced by the capability implementations and wrapped with stage context
//! here.

use crate::poller::Mismatch;
use kat_scenario::{DocumentError, ResourceRef};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Stage of a scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Applying setup manifests
    Setup,
    /// Deploying agents
    Deployment,
    /// Firing the trigger
    Trigger,
    /// Waiting for convergence
    Assertion,
}

impl Stage {
    /// Lowercase stage name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Deployment => "deployment",
            Stage::Trigger => "trigger",
            Stage::Assertion => "assertion",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Resource does not exist
    #[error("{0} not found")]
    NotFound(ResourceRef),

    /// Store refused the write
    #[error("{resource} rejected: {message}")]
    Rejected {
        resource: ResourceRef,
        message: String,
    },

    /// Store could not be reached
    #[error("resource store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Check if the error means the resource is absent
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Agent manager errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// No agent is registered under this name
    #[error("unknown agent {0:?}")]
    Unknown(String),

    /// Agent is not currently deployed
    #[error("agent {0:?} is not deployed")]
    NotDeployed(String),

    /// Lifecycle operation failed
    #[error("agent {agent}: {message}")]
    Failed { agent: String, message: String },
}

/// Activity (cluster event log) errors
#[derive(Debug, Clone, thiserror::Error)]
#[error("listing activity in {namespace}: {message}")]
pub struct ActivityError {
    pub namespace: String,
    pub message: String,
}

/// Manifest loading errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest could not be read
    #[error("reading manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest is not valid YAML
    #[error("decoding manifest {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A document in the manifest does not identify a resource
    #[error("manifest {path} document {index}: {source}")]
    Document {
        path: PathBuf,
        index: usize,
        #[source]
        source: DocumentError,
    },
}

/// Setup stage failure
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Manifest could not be resolved into documents
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A resource could not be created or updated
    #[error("applying {resource}: {source}")]
    Apply {
        resource: ResourceRef,
        #[source]
        source: StoreError,
    },
}

/// Trigger stage failure
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Store write failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Agent operation failed
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Trigger payload does not identify a resource
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// No handler for this trigger kind
    #[error("no handler for trigger kind {0:?}")]
    Unsupported(&'static str),
}

/// Why a convergence wait stopped before all expectations held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitEnd {
    /// Deadline elapsed
    Deadline,
    /// Caller cancelled the run
    Cancelled,
}

impl std::fmt::Display for WaitEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitEnd::Deadline => f.write_str("deadline exceeded"),
            WaitEnd::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Convergence (assertion stage) failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConvergenceError {
    /// Expectations were not all met before the wait ended
    #[error(
        "timed out waiting for expectations after {elapsed}{detail} ({reason})",
        elapsed = humantime::format_duration(*.waited),
        detail = last_mismatch_suffix(.last_mismatch)
    )]
    Timeout {
        waited: Duration,
        reason: WaitEnd,
        last_mismatch: Option<Mismatch>,
    },

    /// The document shape never matched the expected path
    #[error("expected path does not fit document shape: {mismatch}")]
    Evaluation { mismatch: Mismatch },

    /// A condition names no field and can never be met
    #[error("{resource}: condition path {path:?} is empty")]
    InvalidCondition { resource: ResourceRef, path: String },
}

impl ConvergenceError {
    /// Last mismatch observed before the failure, if any
    #[must_use]
    pub fn last_mismatch(&self) -> Option<&Mismatch> {
        match self {
            Self::Timeout { last_mismatch, .. } => last_mismatch.as_ref(),
            Self::Evaluation { mismatch } => Some(mismatch),
            Self::InvalidCondition { .. } => None,
        }
    }

    /// Check if the wait was cut short by the caller
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Timeout {
                reason: WaitEnd::Cancelled,
                ..
            }
        )
    }
}

fn last_mismatch_suffix(m: &Option<Mismatch>) -> String {
    m.as_ref()
        .map(|m| format!("; last mismatch: {m}"))
        .unwrap_or_default()
}

/// Scenario run failure, tagged by stage
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Setup manifest failed
    #[error("setup: manifest {manifest}: {source}")]
    Setup {
        manifest: String,
        #[source]
        source: SetupError,
    },

    /// Agent deployment failed; later agents were not attempted
    #[error("deploying agent {agent}: {source}")]
    Deployment {
        agent: String,
        #[source]
        source: AgentError,
    },

    /// Trigger could not be applied
    #[error("trigger {trigger}: {source}")]
    Trigger {
        trigger: &'static str,
        #[source]
        source: TriggerError,
    },

    /// Cluster did not converge
    #[error("assertion: {0}")]
    Convergence(#[from] ConvergenceError),

    /// Run was cancelled before the convergence wait
    #[error("{stage}: cancelled")]
    Cancelled { stage: Stage },
}

impl ScenarioError {
    /// Stage the failure occurred in
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Setup { .. } => Stage::Setup,
            Self::Deployment { .. } => Stage::Deployment,
            Self::Trigger { .. } => Stage::Trigger,
            Self::Convergence(_) => Stage::Assertion,
            Self::Cancelled { stage } => *stage,
        }
    }

    /// Check if the failure came from caller cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Convergence(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Engine configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config is not valid TOML for this schema
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config values are out of range
    #[error("invalid config: {0}")]
    Invalid(String),

    /// Tracing subscriber could not be installed
    #[error("initialising tracing: {0}")]
    Telemetry(String),
}
