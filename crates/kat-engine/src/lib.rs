//! KAT Engine - scenario execution for convergence tests
//!
//! Runs a [`Scenario`](kat_scenario::Scenario) against a live cluster:
//! - Applies setup manifests (create-or-update)
//! - Deploys the agents under test
//! - Fires the trigger
//! - Polls expectations until the cluster converges or the deadline passes
//! - Gathers diagnostics when it does not
//!
//! The cluster is reached only through the capability traits in
//! [`capability`], so test doubles drop in without touching the engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use kat_engine::prelude::*;
//!
//! # async fn example(cluster: &dyn ClusterConnection, agents: Arc<dyn AgentManager>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_file("kat.toml")?;
//! kat_engine::telemetry::init(&config.log)?;
//!
//! let engine = Engine::connect(cluster, agents, config)?;
//! let scenario = kat_scenario::load("scenarios/scaling-respects-quota.yaml")?;
//! let result = engine.run(&scenario).await;
//!
//! println!("{result}");
//! if let Some(report) = &result.diagnostics {
//!     println!("{report}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod capability;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod lease;
pub mod manifest;
pub mod path;
pub mod poller;
pub mod telemetry;
pub mod trigger;

pub use capability::{
    ActivityRecord, ActivitySource, AgentManager, ClusterConnection, ManifestSource,
    ResourceStore,
};
pub use config::{EngineConfig, LogConfig, LogFormat};
pub use diagnostics::{
    DiagnosticsCoordinator, DiagnosticsReport, DiagnosticsScope, CANCEL_GRACE,
    DEFAULT_DIAGNOSTICS_TIMEOUT,
};
pub use engine::{Engine, ScenarioResult};
pub use error::{
    ActivityError, AgentError, ConfigError, ConvergenceError, ManifestError, ScenarioError,
    SetupError, Stage, StoreError, TriggerError, WaitEnd,
};
pub use lease::AgentLease;
pub use manifest::FileManifestSource;
pub use path::{Lookup, Observed, PathError};
pub use poller::{Convergence, ConvergencePoller, Mismatch, Tick, DEFAULT_POLL_INTERVAL};
pub use trigger::TriggerContext;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running scenarios
    pub use crate::{
        AgentManager, ClusterConnection, DiagnosticsReport, Engine, EngineConfig,
        ResourceStore, ScenarioError, ScenarioResult, Stage,
    };
    pub use kat_scenario::{Expectation, ResourceRef, Scenario, Trigger};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
