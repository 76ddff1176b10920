//! KAT Scenario - declarative convergence test cases
//!
//! A scenario names the agents under test, the initial cluster state, the
//! mutation that kicks things off, and the state the cluster must converge
//! to. This crate owns the in-memory model and the YAML loader; execution
//! lives in `kat-engine`.
//!
//! # Example
//!
//! ```rust,ignore
//! use kat_scenario::load;
//!
//! let scenario = load("scenarios/scaling-respects-quota.yaml")?;
//! assert!(!scenario.agents.is_empty());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod duration;
pub mod error;
pub mod loader;
pub mod trigger;
pub mod types;

pub use error::{DocumentError, LoadError};
pub use loader::{load, load_dir, parse_str};
pub use trigger::{CreateResource, KillAgent, ResourcePatch, Trigger};
pub use types::{
    Condition, Expectation, ResourceRef, Scenario, Setup, DEFAULT_NAMESPACE, DEFAULT_TIMEOUT,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
