//! Workflow definition types for Treadle.
//!
//! A `WorkflowSpec` is the already-deserialized form of a workflow document:
//! a set of named templates plus the entrypoint to instantiate. Templates are
//! immutable; the expander in `treadle-core` turns them into runtime nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::{MergeStrategy, ResourceVerb};

// ---------------------------------------------------------------------------
// Workflow spec
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Workflow name; also the name of the root node.
    pub name: String,
    /// Name of the template instantiated as the root node.
    pub entrypoint: String,
    /// Workflow-level parameters, visible as `{{workflow.parameters.<name>}}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
    /// Exit handler template run once the root node is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    /// All templates available to this workflow.
    pub templates: Vec<Template>,
}

impl WorkflowSpec {
    /// Look up a template by name.
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A named, reusable unit of work.
///
/// The body is a sum type so the expander must handle every kind explicitly.
/// In YAML the body is keyed by its kind:
/// ```yaml
/// name: create-job
/// resource:
///   action: create
///   manifest: |
///     apiVersion: batch/v1
///     kind: Job
///   success_condition: status.succeeded > 0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Declared input parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ParameterDecl>,
    /// Exit handler attached to every instantiation of this template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    #[serde(flatten)]
    pub body: TemplateBody,
}

/// The kind-specific part of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateBody {
    /// Run a container image.
    Container(ContainerSpec),
    /// Perform an action against a declarative manifest.
    Resource(ResourceSpec),
    /// Ordered step groups; steps inside a group run in parallel.
    Steps(Vec<Vec<WorkflowStep>>),
    /// Tasks with explicit dependency edges.
    Dag(DagSpec),
}

impl TemplateBody {
    /// Short kind label for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateBody::Container(_) => "container",
            TemplateBody::Resource(_) => "resource",
            TemplateBody::Steps(_) => "steps",
            TemplateBody::Dag(_) => "dag",
        }
    }

    /// Whether this template expands into child nodes.
    pub fn is_composite(&self) -> bool {
        matches!(self, TemplateBody::Steps(_) | TemplateBody::Dag(_))
    }
}

/// Declaration of an input parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    /// Value used when the caller does not bind the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Container template body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Resource template body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub action: ResourceVerb,
    /// Inline manifest payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Path to a manifest file. Takes precedence over `manifest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    /// Free-form flags; when present they follow the verb verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Patch strategy used for `patch` without flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_condition: Option<String>,
}

// ---------------------------------------------------------------------------
// Steps and DAG tasks
// ---------------------------------------------------------------------------

/// One step inside a step group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    /// Template to instantiate.
    pub template: String,
    /// Input parameter bindings for the referenced template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
    /// Fan-out source: one sibling node per item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_items: Option<Vec<serde_json::Value>>,
    /// Exit handler for every instance of this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    /// Run even when the previous step group did not fully succeed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tolerate_failure: bool,
}

/// DAG template body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagSpec {
    pub tasks: Vec<DagTask>,
}

/// One task of a DAG template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagTask {
    pub name: String,
    pub template: String,
    /// Names of tasks in the same DAG this task waits for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_items: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    /// Run once dependencies are terminal even if some of them failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tolerate_failure: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
name: deploy
entrypoint: main
arguments:
  env: staging
on_exit: notify
templates:
  - name: main
    dag:
      tasks:
        - name: create
          template: create-job
        - name: fan
          template: echo
          dependencies: [create]
          with_items: [a, b, c]
          arguments:
            msg: "{{item}}"
  - name: create-job
    resource:
      action: create
      manifest: "kind: Job"
      success_condition: status.succeeded > 0
      failure_condition: status.failed > 3
  - name: echo
    inputs:
      - name: msg
    container:
      image: alpine:3.20
      command: [echo, "{{inputs.parameters.msg}}"]
  - name: notify
    container:
      image: alpine:3.20
"#;

    #[test]
    fn test_yaml_deserializes_all_template_kinds() {
        let spec: WorkflowSpec = serde_yaml_ng::from_str(SAMPLE).unwrap();
        assert_eq!(spec.name, "deploy");
        assert_eq!(spec.on_exit.as_deref(), Some("notify"));
        assert_eq!(spec.arguments["env"], "staging");

        let main = spec.template("main").unwrap();
        let TemplateBody::Dag(dag) = &main.body else {
            panic!("expected dag, got {:?}", main.body);
        };
        assert_eq!(dag.tasks.len(), 2);
        assert_eq!(dag.tasks[1].dependencies, vec!["create"]);
        assert_eq!(
            dag.tasks[1].with_items,
            Some(vec![json!("a"), json!("b"), json!("c")])
        );

        let create = spec.template("create-job").unwrap();
        match &create.body {
            TemplateBody::Resource(r) => {
                assert_eq!(r.action, ResourceVerb::Create);
                assert_eq!(r.success_condition.as_deref(), Some("status.succeeded > 0"));
                assert!(r.flags.is_empty());
            }
            other => panic!("expected resource, got {other:?}"),
        }

        let echo = spec.template("echo").unwrap();
        assert_eq!(echo.inputs[0].name, "msg");
        assert_eq!(echo.body.kind(), "container");
    }

    #[test]
    fn test_steps_body_is_list_of_groups() {
        let yaml = r#"
name: seq
steps:
  - - name: a
      template: t
  - - name: b
      template: t
    - name: c
      template: t
      tolerate_failure: true
"#;
        let template: Template = serde_yaml_ng::from_str(yaml).unwrap();
        let TemplateBody::Steps(groups) = &template.body else {
            panic!("expected steps");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].len(), 2);
        assert!(!groups[1][0].tolerate_failure);
        assert!(groups[1][1].tolerate_failure);
        assert!(template.body.is_composite());
    }

    #[test]
    fn test_unknown_template_lookup() {
        let spec: WorkflowSpec = serde_yaml_ng::from_str(SAMPLE).unwrap();
        assert!(spec.template("missing").is_none());
    }
}
