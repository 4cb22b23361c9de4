//! Resource action types: verbs, patch strategies, and object identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Imperative verb applied to a declarative manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceVerb {
    Create,
    Apply,
    Patch,
    Delete,
    Get,
}

impl ResourceVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceVerb::Create => "create",
            ResourceVerb::Apply => "apply",
            ResourceVerb::Patch => "patch",
            ResourceVerb::Delete => "delete",
            ResourceVerb::Get => "get",
        }
    }
}

impl fmt::Display for ResourceVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patch type passed as `--type` for `patch` actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Strategic,
    Merge,
    Json,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Strategic => "strategic",
            MergeStrategy::Merge => "merge",
            MergeStrategy::Json => "json",
        }
    }
}

/// Identity of the object an action was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    /// Extract identity from a response document (`kind`, `metadata.name`,
    /// `metadata.namespace`). Returns `None` when kind or name is missing.
    pub fn from_document(doc: &serde_json::Value) -> Option<Self> {
        let kind = doc.get("kind")?.as_str()?.to_string();
        let metadata = doc.get("metadata")?;
        let name = metadata.get("name")?.as_str()?.to_string();
        let namespace = metadata
            .get("namespace")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Some(Self {
            kind,
            namespace,
            name,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
