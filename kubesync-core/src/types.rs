//! Domain types shared by the sync engine and its collaborators.
//!
//! Remote objects are dynamically typed; the engine only ever reads their
//! identity (name, namespace) through [`ObjectIdentity`] and forwards the
//! rest untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IdentityError;

// ---------------------------------------------------------------------------
// Resource type
// ---------------------------------------------------------------------------

/// A remote collection to mirror: group/version/resource plus the namespacing rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceType {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `pods`.
    pub resource: String,
    #[serde(default)]
    pub namespaced: bool,
}

impl ResourceType {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            namespaced,
        }
    }

    /// Subtree in the data sink that holds every object of this type.
    pub fn storage_prefix(&self) -> &str {
        &self.resource
    }

    /// True for the core (legacy, group-less) API group.
    pub fn is_core_group(&self) -> bool {
        self.group.is_empty()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_core_group() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

// ---------------------------------------------------------------------------
// Objects and identity
// ---------------------------------------------------------------------------

/// Read access to the identity metadata of a remote object.
pub trait ObjectIdentity {
    fn name(&self) -> Result<&str, IdentityError>;
    fn namespace(&self) -> Option<&str>;
}

/// An opaque, dynamically-typed remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceObject(pub Value);

impl ResourceObject {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|meta| meta.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl From<Value> for ResourceObject {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl ObjectIdentity for ResourceObject {
    fn name(&self) -> Result<&str, IdentityError> {
        self.metadata_str("name").ok_or(IdentityError::MissingName)
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }
}

// ---------------------------------------------------------------------------
// Listing and events
// ---------------------------------------------------------------------------

/// Opaque cursor returned by a listing; anchors the following watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumptionToken(pub String);

impl fmt::Display for ResumptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ResumptionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResumptionToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A consistent point-in-time listing of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub items: Vec<ResourceObject>,
    pub token: ResumptionToken,
}

/// One change delivered by a watch subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(ResourceObject),
    Modified(ResourceObject),
    Deleted(ResourceObject),
    /// The remote side reported an error on the stream.
    Error(String),
    /// The stream ended, or delivered something the engine does not understand.
    Closed,
}

impl ChangeEvent {
    /// Short label used in logs and error context.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "add",
            ChangeEvent::Modified(_) => "modify",
            ChangeEvent::Deleted(_) => "delete",
            ChangeEvent::Error(_) => "error",
            ChangeEvent::Closed => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
