//! Core scenario types
//!
//! Defines the declarative test case handed to the engine:
//! - Scenario and its setup
//! - Resource references
//! - Expectations and field conditions

use crate::error::{DocumentError, LoadError};
use crate::trigger::Trigger;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Convergence timeout used when a scenario leaves it unset or zero
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Namespace assumed for references that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// A declarative multi-agent test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Agents to deploy, in order
    #[serde(default)]
    pub agents: Vec<String>,
    /// Initial cluster state
    #[serde(default)]
    pub setup: Setup,
    /// Mutation that kicks off the behavior under test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    /// Expected end state
    #[serde(default)]
    pub expect: Vec<Expectation>,
    /// Bound on the convergence wait
    #[serde(
        default,
        with = "crate::duration::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl Scenario {
    /// Create a scenario with the given name and agents
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: None,
            agents: agents.into_iter().map(Into::into).collect(),
            setup: Setup::default(),
            trigger: None,
            expect: Vec::new(),
            timeout: None,
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With a setup manifest appended
    #[inline]
    #[must_use]
    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.setup.manifests.push(manifest.into());
        self
    }

    /// With trigger
    #[inline]
    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<Trigger>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    /// With an expectation appended
    #[inline]
    #[must_use]
    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }

    /// With convergence timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Timeout applied to the convergence wait
    ///
    /// `fallback` applies when the scenario sets none or sets zero.
    #[must_use]
    pub fn effective_timeout(&self, fallback: Duration) -> Duration {
        match self.timeout {
            Some(t) if !t.is_zero() => t,
            _ => fallback,
        }
    }

    /// Check the invariants the engine relies on
    ///
    /// # Errors
    /// `LoadError::Invalid` naming the first violated invariant
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.name.trim().is_empty() {
            return Err(LoadError::invalid("<unnamed>", "name is required"));
        }
        if self.agents.is_empty() {
            return Err(LoadError::invalid(
                &self.name,
                "at least one agent is required",
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.trim().is_empty() {
                return Err(LoadError::invalid(&self.name, "agent name is empty"));
            }
            if !seen.insert(agent.as_str()) {
                return Err(LoadError::invalid(
                    &self.name,
                    format!("agent {agent} listed more than once"),
                ));
            }
        }

        for exp in &self.expect {
            for cond in &exp.conditions {
                if cond.is_path_empty() {
                    return Err(LoadError::invalid(
                        &self.name,
                        format!("{}: condition path is empty", exp.resource),
                    ));
                }
                if !is_scalar(&cond.value) {
                    return Err(LoadError::invalid(
                        &self.name,
                        format!(
                            "{} path {}: expected value must be a string, boolean or number",
                            exp.resource, cond.path
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Initial cluster state for a scenario
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    /// Manifest references applied in order before agents are deployed
    #[serde(default)]
    pub manifests: Vec<String>,
}

/// Identifies a single resource in the target cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// API group and version (`apps/v1`)
    pub api_version: String,
    /// Resource kind (`Deployment`)
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Namespace; empty means [`DEFAULT_NAMESPACE`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ResourceRef {
    /// Create a reference in the default namespace
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: String::new(),
        }
    }

    /// In namespace
    #[inline]
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Namespace, falling back to [`DEFAULT_NAMESPACE`]
    #[inline]
    #[must_use]
    pub fn namespace_or_default(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    /// Derive a reference from a full resource document
    ///
    /// Reads `apiVersion`, `kind`, `metadata.name` and the optional
    /// `metadata.namespace`.
    ///
    /// # Errors
    /// `DocumentError` if the document is not a mapping or lacks an
    /// identifying field
    pub fn from_document(document: &Value) -> Result<Self, DocumentError> {
        let obj = document.as_object().ok_or(DocumentError::NotAMapping)?;
        let field = |name: &'static str, v: Option<&Value>| {
            v.and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(DocumentError::MissingField(name))
        };

        let metadata = obj.get("metadata");
        Ok(Self {
            api_version: field("apiVersion", obj.get("apiVersion"))?,
            kind: field("kind", obj.get("kind"))?,
            name: field("metadata.name", metadata.and_then(|m| m.get("name")))?,
            namespace: metadata
                .and_then(|m| m.get("namespace"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.to_lowercase(), self.name)
    }
}

/// Expected state of one resource after convergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    /// Resource to inspect
    pub resource: ResourceRef,
    /// Field conditions that must all hold
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Expectation {
    /// Create expectation without conditions
    #[inline]
    #[must_use]
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource,
            conditions: Vec::new(),
        }
    }

    /// With a condition appended
    #[inline]
    #[must_use]
    pub fn with_condition(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::new(path, value));
        self
    }
}

/// A single field-level assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated field path (`.status.readyReplicas`)
    pub path: String,
    /// Expected scalar value
    pub value: Value,
}

impl Condition {
    /// Create condition
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }

    /// True for `""` and `"."`, which name no field at all
    #[inline]
    #[must_use]
    pub fn is_path_empty(&self) -> bool {
        self.path.strip_prefix('.').unwrap_or(&self.path).is_empty()
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Bool(_) | Value::Number(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Scenario {
        Scenario::new("s", ["a", "b"]).with_expectation(
            Expectation::new(ResourceRef::new("apps/v1", "Deployment", "target"))
                .with_condition(".spec.replicas", 5),
        )
    }

    #[test]
    fn effective_timeout_falls_back() {
        let fallback = Duration::from_secs(45);
        let s = valid();
        assert_eq!(s.effective_timeout(DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
        assert_eq!(s.effective_timeout(fallback), fallback);

        let s = valid().with_timeout(Duration::ZERO);
        assert_eq!(s.effective_timeout(fallback), fallback);

        let s = valid().with_timeout(Duration::from_secs(30));
        assert_eq!(s.effective_timeout(fallback), Duration::from_secs(30));
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut s = valid();
        s.name = "  ".to_string();
        assert!(matches!(s.validate(), Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn validate_rejects_empty_agents() {
        let mut s = valid();
        s.agents.clear();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("at least one agent"));
    }

    #[test]
    fn validate_rejects_duplicate_agents() {
        let s = Scenario::new("dup", ["a", "a"]);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn validate_rejects_empty_path() {
        let s = Scenario::new("p", ["a"]).with_expectation(
            Expectation::new(ResourceRef::new("v1", "ConfigMap", "cm")).with_condition(".", 1),
        );
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("configmap/cm"));
    }

    #[test]
    fn validate_rejects_non_scalar_value() {
        let s = Scenario::new("p", ["a"]).with_expectation(
            Expectation::new(ResourceRef::new("v1", "ConfigMap", "cm"))
                .with_condition(".data", json!({"k": "v"})),
        );
        assert!(s.validate().is_err());
    }

    #[test]
    fn resource_ref_display_and_namespace() {
        let r = ResourceRef::new("apps/v1", "Deployment", "target");
        assert_eq!(r.to_string(), "deployment/target");
        assert_eq!(r.namespace_or_default(), "default");
        assert_eq!(r.in_namespace("prod").namespace_or_default(), "prod");
    }

    #[test]
    fn resource_ref_from_document() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "quota", "namespace": "team-a"},
            "data": {"limit": "5"}
        });
        let r = ResourceRef::from_document(&doc).unwrap();
        assert_eq!(r, ResourceRef::new("v1", "ConfigMap", "quota").in_namespace("team-a"));

        let missing = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}});
        assert_eq!(
            ResourceRef::from_document(&missing),
            Err(DocumentError::MissingField("metadata.name"))
        );
        assert_eq!(
            ResourceRef::from_document(&json!([1, 2])),
            Err(DocumentError::NotAMapping)
        );
    }

    #[test]
    fn condition_path_emptiness() {
        assert!(Condition::new("", 1).is_path_empty());
        assert!(Condition::new(".", 1).is_path_empty());
        assert!(!Condition::new(".spec", 1).is_path_empty());
        assert!(!Condition::new("spec", 1).is_path_empty());
    }
}
