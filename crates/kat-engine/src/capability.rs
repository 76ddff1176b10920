//! Collaborator capabilities
//!
//! The engine reaches the outside world only through these traits. Real
//! implementations talk to a cluster; test doubles substitute them without
//! any change to the orchestrator, poller or evaluator.

use crate::error::{ActivityError, AgentError, ManifestError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kat_scenario::ResourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Read/write access to structured resources in the target cluster
///
/// Implementations must be safe for concurrent use: scenario runs share one
/// store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create the resource, or update it if it already exists
    async fn create_or_update(&self, resource: &ResourceRef, document: Value)
        -> Result<(), StoreError>;

    /// Merge a partial document into an existing resource
    async fn patch(&self, resource: &ResourceRef, partial: Value) -> Result<(), StoreError>;

    /// Fetch the current document of a resource
    async fn fetch(&self, resource: &ResourceRef) -> Result<Value, StoreError>;
}

/// Lifecycle control over agents in the target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentManager: Send + Sync {
    /// Start the named agent
    async fn deploy(&self, agent: &str) -> Result<(), AgentError>;

    /// Stop the named agent; it may be deployed again later
    async fn stop(&self, agent: &str) -> Result<(), AgentError>;

    /// Stop every agent this manager has deployed
    async fn stop_all(&self) -> Result<(), AgentError>;

    /// Recent output of the named agent
    async fn recent_output(&self, agent: &str) -> Result<String, AgentError>;
}

/// One entry from the cluster activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// When the activity was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Short machine-readable reason (`ScalingReplicaSet`)
    pub reason: String,
    /// Object the activity concerns (`deployment/target`)
    pub object: String,
    /// Human-readable message
    pub message: String,
}

impl ActivityRecord {
    /// Create record without timestamp
    #[must_use]
    pub fn new(
        reason: impl Into<String>,
        object: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: None,
            reason: reason.into(),
            object: object.into(),
            message: message.into(),
        }
    }

    /// At timestamp
    #[inline]
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl std::fmt::Display for ActivityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ts) = self.timestamp {
            write!(f, "{} ", ts.to_rfc3339())?;
        }
        write!(f, "{} {}: {}", self.object, self.reason, self.message)
    }
}

/// Source of recent cluster activity, scoped by namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Recent activity records in `namespace`, oldest first
    async fn recent_activity(&self, namespace: &str) -> Result<Vec<ActivityRecord>, ActivityError>;
}

/// Resolves setup manifest references into resource documents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Documents named by `reference`, in order
    async fn load(&self, reference: &str) -> Result<Vec<Value>, ManifestError>;
}

/// Handle to a provisioned cluster
///
/// The engine neither creates nor destroys clusters; it only asks the
/// connection for a resource store once.
pub trait ClusterConnection: Send + Sync {
    /// Human-readable cluster name
    fn name(&self) -> &str;

    /// Build a resource store for this cluster
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the cluster cannot be reached
    fn resource_store(&self) -> Result<Arc<dyn ResourceStore>, StoreError>;
}
