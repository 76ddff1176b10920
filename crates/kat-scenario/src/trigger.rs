//! Trigger variants
//!
//! A trigger is the mutation fired after agents are up. The set of kinds is
//! open: each kind is a variant with its own payload type, and the engine
//! dispatches on the variant.
//!
//! In a scenario document a trigger is a mapping with exactly one key naming
//! its kind:
//!
//! ```yaml
//! trigger:
//!   patch:
//!     apiVersion: apps/v1
//!     kind: Deployment
//!     name: target
//!     spec:
//!       replicas: 10
//! ```

use crate::error::DocumentError;
use crate::types::ResourceRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutation that kicks off the behavior under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TriggerDoc", into = "TriggerDoc")]
#[non_exhaustive]
pub enum Trigger {
    /// Merge a partial document into an existing resource
    Patch(ResourcePatch),
    /// Create (or update) a full resource
    CreateResource(CreateResource),
    /// Stop a running agent
    KillAgent(KillAgent),
}

impl Trigger {
    /// Short kind name, as written in scenario documents
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Patch(_) => "patch",
            Self::CreateResource(_) => "createResource",
            Self::KillAgent(_) => "killAgent",
        }
    }

    /// Namespace the trigger acts in, if it targets a resource
    #[must_use]
    pub fn namespace(&self) -> Option<String> {
        match self {
            Self::Patch(p) if !p.target.namespace.is_empty() => Some(p.target.namespace.clone()),
            Self::CreateResource(c) => c
                .reference()
                .ok()
                .filter(|r| !r.namespace.is_empty())
                .map(|r| r.namespace),
            _ => None,
        }
    }
}

impl From<ResourcePatch> for Trigger {
    fn from(p: ResourcePatch) -> Self {
        Self::Patch(p)
    }
}

impl From<CreateResource> for Trigger {
    fn from(c: CreateResource) -> Self {
        Self::CreateResource(c)
    }
}

impl From<KillAgent> for Trigger {
    fn from(k: KillAgent) -> Self {
        Self::KillAgent(k)
    }
}

/// Partial update of an existing resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePatch {
    /// Resource to patch
    #[serde(flatten)]
    pub target: ResourceRef,
    /// Fields merged under `spec`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    /// Fields merged under `metadata` (labels, annotations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ResourcePatch {
    /// Create an empty patch against a resource
    #[inline]
    #[must_use]
    pub fn new(target: ResourceRef) -> Self {
        Self {
            target,
            spec: None,
            metadata: None,
        }
    }

    /// With spec fields
    #[inline]
    #[must_use]
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = Some(spec);
        self
    }

    /// With metadata fields
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Partial document to merge into the target
    #[must_use]
    pub fn document(&self) -> Value {
        let mut doc = Map::new();
        if let Some(metadata) = &self.metadata {
            doc.insert("metadata".to_string(), metadata.clone());
        }
        if let Some(spec) = &self.spec {
            doc.insert("spec".to_string(), spec.clone());
        }
        Value::Object(doc)
    }
}

/// Full resource created by the trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResource {
    /// Complete resource document
    pub document: Value,
}

impl CreateResource {
    /// Create from document
    #[inline]
    #[must_use]
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    /// Reference identified by the document
    ///
    /// # Errors
    /// `DocumentError` if identifying fields are missing
    pub fn reference(&self) -> Result<ResourceRef, DocumentError> {
        ResourceRef::from_document(&self.document)
    }
}

/// Agent stopped by the trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillAgent {
    /// Agent identifier
    pub agent: String,
}

impl KillAgent {
    /// Create for agent
    #[inline]
    #[must_use]
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

/// Document form: one optional key per trigger kind
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    patch: Option<ResourcePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_resource: Option<CreateResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kill_agent: Option<KillAgent>,
}

impl TryFrom<TriggerDoc> for Trigger {
    type Error = String;

    fn try_from(doc: TriggerDoc) -> Result<Self, Self::Error> {
        let mut kinds: Vec<Trigger> = Vec::with_capacity(1);
        kinds.extend(doc.patch.map(Trigger::Patch));
        kinds.extend(doc.create_resource.map(Trigger::CreateResource));
        kinds.extend(doc.kill_agent.map(Trigger::KillAgent));

        match kinds.len() {
            1 => Ok(kinds.remove(0)),
            0 => Err("trigger must name one kind (patch, createResource, killAgent)".to_string()),
            _ => Err(format!(
                "trigger names {} kinds; exactly one is allowed",
                kinds.len()
            )),
        }
    }
}

impl From<Trigger> for TriggerDoc {
    fn from(trigger: Trigger) -> Self {
        let mut doc = TriggerDoc::default();
        match trigger {
            Trigger::Patch(p) => doc.patch = Some(p),
            Trigger::CreateResource(c) => doc.create_resource = Some(c),
            Trigger::KillAgent(k) => doc.kill_agent = Some(k),
        }
        doc
    }
}
