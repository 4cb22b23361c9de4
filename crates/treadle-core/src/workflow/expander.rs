//! Template Expander: turns a workflow's entrypoint into the flat node graph
//! the engine runs.
//!
//! # Naming
//!
//! | Node                       | Name                        |
//! |----------------------------|-----------------------------|
//! | root                       | `<workflow>`                |
//! | step `s` in group `i`      | `<parent>[i].s`             |
//! | DAG task `t`               | `<parent>.t`                |
//! | loop sibling `j`           | `<base>(j:<item label>)`    |
//! | exit handler of `a`        | `<a>.onExit`                |
//!
//! Steps and DAG templates become `Group` nodes. Their children carry the
//! group's name as `boundary_id` and only see dependencies inside the group;
//! the group itself carries the external ones.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use treadle_types::node::{Node, RunPolicy};
use treadle_types::workflow::{
    ContainerSpec, DagSpec, ResourceSpec, Template, TemplateBody, WorkflowSpec, WorkflowStep,
};

use super::condition::{Selector, SelectorError};
use super::dag::{DependencyNode, GraphError, validate_dag};
use super::resource::ResourceActionRequest;
use super::scope::{Scope, Unresolved, item_label};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// What the engine does with a node once it is released.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Container(ContainerSpec),
    Resource(ResourceActionRequest),
    /// Stands for a Steps/DAG instance; its phase aggregates its children.
    Group,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Container(_) => "container",
            NodeKind::Resource(_) => "resource",
            NodeKind::Group => "group",
        }
    }
}

/// A pending node plus the work it stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub node: Node,
    pub kind: NodeKind,
}

impl DependencyNode for NodeSpec {
    fn id(&self) -> &str {
        &self.node.name
    }

    fn depends_on(&self) -> &[String] {
        &self.node.dependencies
    }
}

/// Every node of one workflow run, in expansion order.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGraph {
    pub workflow: String,
    /// Name of the root node.
    pub root: String,
    pub nodes: Vec<NodeSpec>,
}

impl NodeGraph {
    pub fn get(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.node.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Construction errors. None of them is retried.
#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("template '{template}' not found (referenced by '{referenced_by}')")]
    MissingTemplate {
        template: String,
        referenced_by: String,
    },

    #[error("template '{template}' requires input parameter '{parameter}'")]
    MissingInput { template: String, parameter: String },

    #[error("template '{template}' has no input parameter '{parameter}'")]
    UnknownArgument { template: String, parameter: String },

    #[error("unresolved reference '{{{{{reference}}}}}' in node '{node}'")]
    UnresolvedReference { reference: String, node: String },

    #[error("invalid {which} condition in template '{template}': {source}")]
    InvalidSelector {
        template: String,
        which: &'static str,
        #[source]
        source: SelectorError,
    },

    #[error("invalid DAG in template '{template}': {source}")]
    InvalidDag {
        template: String,
        #[source]
        source: GraphError,
    },

    #[error("'{item}' in template '{template}' has an empty with_items list")]
    EmptyLoop { template: String, item: String },

    #[error("template '{0}' instantiates itself")]
    RecursiveTemplate(String),

    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Expand `spec` from its entrypoint into a node graph.
pub fn expand_workflow(spec: &WorkflowSpec) -> Result<NodeGraph, ExpandError> {
    let mut expander = Expander {
        spec,
        workflow_scope: Scope::for_workflow(spec),
        nodes: Vec::new(),
        names: HashSet::new(),
        stack: Vec::new(),
    };

    let entry = expander.template(&spec.entrypoint, &spec.name)?;
    let arguments: BTreeMap<String, String> = spec
        .arguments
        .iter()
        .filter(|(name, _)| entry.inputs.iter().any(|d| &d.name == *name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let scope = expander.workflow_scope.clone();
    expander.instantiate(
        spec.name.clone(),
        &spec.entrypoint,
        &arguments,
        &scope,
        &spec.name,
        Placement::root(),
    )?;

    let exit = spec.on_exit.as_ref().or(entry.on_exit.as_ref());
    if let Some(exit) = exit {
        expander.attach_exit(&spec.name, exit, None)?;
    }

    tracing::debug!(
        workflow = %spec.name,
        nodes = expander.nodes.len(),
        "workflow expanded"
    );

    Ok(NodeGraph {
        workflow: spec.name.clone(),
        root: spec.name.clone(),
        nodes: expander.nodes,
    })
}

/// Where a new node sits in the graph.
struct Placement {
    dependencies: Vec<String>,
    boundary: Option<String>,
    policy: RunPolicy,
    exit_handler: bool,
}

impl Placement {
    fn root() -> Self {
        Self {
            dependencies: Vec::new(),
            boundary: None,
            policy: RunPolicy::AllSucceeded,
            exit_handler: false,
        }
    }

    fn policy_for(tolerate_failure: bool) -> RunPolicy {
        if tolerate_failure {
            RunPolicy::AnyTerminal
        } else {
            RunPolicy::AllSucceeded
        }
    }
}

struct Expander<'a> {
    spec: &'a WorkflowSpec,
    workflow_scope: Scope,
    nodes: Vec<NodeSpec>,
    names: HashSet<String>,
    /// Composite templates currently being expanded.
    stack: Vec<String>,
}

impl<'a> Expander<'a> {
    fn template(&self, name: &str, referenced_by: &str) -> Result<&'a Template, ExpandError> {
        self.spec
            .template(name)
            .ok_or_else(|| ExpandError::MissingTemplate {
                template: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }

    fn push(&mut self, spec: NodeSpec) -> Result<(), ExpandError> {
        if !self.names.insert(spec.node.name.clone()) {
            return Err(ExpandError::DuplicateNode(spec.node.name));
        }
        self.nodes.push(spec);
        Ok(())
    }

    /// Create the node `name` for `template_name` and, for composites, all of
    /// its descendants.
    fn instantiate(
        &mut self,
        name: String,
        template_name: &str,
        arguments: &BTreeMap<String, String>,
        caller_scope: &Scope,
        referenced_by: &str,
        placement: Placement,
    ) -> Result<(), ExpandError> {
        let template = self.template(template_name, referenced_by)?;
        if self.stack.iter().any(|t| t == &template.name) {
            return Err(ExpandError::RecursiveTemplate(template.name.clone()));
        }

        let inputs = resolve_inputs(template, arguments, caller_scope, &name)?;
        let scope = self.workflow_scope.for_template(&inputs);

        let mut node = Node::new(name.clone(), template.name.clone());
        node.inputs = inputs;
        node.dependencies = placement.dependencies;
        node.boundary_id = placement.boundary;
        node.run_policy = placement.policy;
        node.exit_handler = placement.exit_handler;
        let exit_handler = placement.exit_handler;

        match &template.body {
            TemplateBody::Container(container) => {
                let kind = NodeKind::Container(substitute_container(container, &scope, &name)?);
                self.push(NodeSpec { node, kind })
            }
            TemplateBody::Resource(resource) => {
                let kind =
                    NodeKind::Resource(build_request(resource, &template.name, &scope, &name)?);
                self.push(NodeSpec { node, kind })
            }
            TemplateBody::Steps(groups) => {
                self.push(NodeSpec {
                    node,
                    kind: NodeKind::Group,
                })?;
                self.stack.push(template.name.clone());
                self.expand_steps(&name, &template.name, groups, &scope, exit_handler)?;
                self.stack.pop();
                Ok(())
            }
            TemplateBody::Dag(dag) => {
                self.push(NodeSpec {
                    node,
                    kind: NodeKind::Group,
                })?;
                self.stack.push(template.name.clone());
                self.expand_dag(&name, &template.name, dag, &scope, exit_handler)?;
                self.stack.pop();
                Ok(())
            }
        }
    }

    /// Synthesize `<anchor>.onExit`, released by any terminal phase of the
    /// anchor.
    fn attach_exit(
        &mut self,
        anchor: &str,
        exit_template: &str,
        boundary: Option<String>,
    ) -> Result<(), ExpandError> {
        let scope = self.workflow_scope.clone();
        self.instantiate(
            format!("{anchor}.onExit"),
            exit_template,
            &BTreeMap::new(),
            &scope,
            anchor,
            Placement {
                dependencies: vec![anchor.to_string()],
                boundary,
                policy: RunPolicy::AnyTerminal,
                exit_handler: true,
            },
        )
    }

    /// The exit handler for an instance: the step/task's own, else the
    /// referenced template's.
    fn exit_for(&self, own: Option<&'a String>, template_name: &str) -> Option<&'a String> {
        own.or_else(|| {
            self.spec
                .template(template_name)
                .and_then(|t| t.on_exit.as_ref())
        })
    }

    fn expand_steps(
        &mut self,
        parent: &str,
        template_name: &str,
        groups: &'a [Vec<WorkflowStep>],
        scope: &Scope,
        exit_handler: bool,
    ) -> Result<(), ExpandError> {
        let mut previous: Vec<String> = Vec::new();

        for (i, group) in groups.iter().enumerate() {
            let mut anchors = Vec::new();
            for step in group {
                let base = format!("{parent}[{i}].{}", step.name);
                let instances =
                    loop_instances(base, step.with_items.as_deref(), scope, template_name, &step.name)?;

                for (name, item_scope) in instances {
                    self.instantiate(
                        name.clone(),
                        &step.template,
                        &step.arguments,
                        &item_scope,
                        &name,
                        Placement {
                            dependencies: previous.clone(),
                            boundary: Some(parent.to_string()),
                            policy: Placement::policy_for(step.tolerate_failure),
                            exit_handler,
                        },
                    )?;
                    if let Some(exit) = self.exit_for(step.on_exit.as_ref(), &step.template) {
                        self.attach_exit(&name, exit, Some(parent.to_string()))?;
                    }
                    anchors.push(name);
                }
            }
            if !anchors.is_empty() {
                previous = anchors;
            }
        }

        Ok(())
    }

    fn expand_dag(
        &mut self,
        parent: &str,
        template_name: &str,
        dag: &'a DagSpec,
        scope: &Scope,
        exit_handler: bool,
    ) -> Result<(), ExpandError> {
        validate_dag(&dag.tasks).map_err(|source| ExpandError::InvalidDag {
            template: template_name.to_string(),
            source,
        })?;

        // Name every instance first so dependents can fan in on all siblings.
        let mut instances: HashMap<&str, Vec<(String, Scope)>> = HashMap::new();
        for task in &dag.tasks {
            let base = format!("{parent}.{}", task.name);
            instances.insert(
                task.name.as_str(),
                loop_instances(base, task.with_items.as_deref(), scope, template_name, &task.name)?,
            );
        }

        for task in &dag.tasks {
            let dependencies: Vec<String> = task
                .dependencies
                .iter()
                .flat_map(|dep| instances.get(dep.as_str()).into_iter().flatten())
                .map(|(name, _)| name.clone())
                .collect();

            for (name, item_scope) in instances.get(task.name.as_str()).into_iter().flatten() {
                self.instantiate(
                    name.clone(),
                    &task.template,
                    &task.arguments,
                    item_scope,
                    name,
                    Placement {
                        dependencies: dependencies.clone(),
                        boundary: Some(parent.to_string()),
                        policy: Placement::policy_for(task.tolerate_failure),
                        exit_handler,
                    },
                )?;
                if let Some(exit) = self.exit_for(task.on_exit.as_ref(), &task.template) {
                    self.attach_exit(name, exit, Some(parent.to_string()))?;
                }
            }
        }

        Ok(())
    }
}

/// One `(name, scope)` per loop item, or the base name alone without a loop.
fn loop_instances(
    base: String,
    with_items: Option<&[Value]>,
    scope: &Scope,
    template_name: &str,
    item: &str,
) -> Result<Vec<(String, Scope)>, ExpandError> {
    match with_items {
        None => Ok(vec![(base, scope.clone())]),
        Some([]) => Err(ExpandError::EmptyLoop {
            template: template_name.to_string(),
            item: item.to_string(),
        }),
        Some(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(j, value)| (format!("{base}({j}:{})", item_label(value)), scope.with_item(value)))
            .collect()),
    }
}

/// Bind a template's declared inputs from the caller's arguments and the
/// declared defaults. Argument values are substituted in the caller's scope.
fn resolve_inputs(
    template: &Template,
    arguments: &BTreeMap<String, String>,
    caller_scope: &Scope,
    node: &str,
) -> Result<BTreeMap<String, String>, ExpandError> {
    if let Some(unknown) = arguments
        .keys()
        .find(|k| !template.inputs.iter().any(|d| &d.name == *k))
    {
        return Err(ExpandError::UnknownArgument {
            template: template.name.clone(),
            parameter: unknown.clone(),
        });
    }

    let mut inputs = BTreeMap::new();
    for decl in &template.inputs {
        let raw = arguments
            .get(&decl.name)
            .or(decl.default.as_ref())
            .ok_or_else(|| ExpandError::MissingInput {
                template: template.name.clone(),
                parameter: decl.name.clone(),
            })?;
        inputs.insert(decl.name.clone(), substitute(caller_scope, raw, node)?);
    }
    Ok(inputs)
}

fn substitute(scope: &Scope, text: &str, node: &str) -> Result<String, ExpandError> {
    scope
        .substitute(text)
        .map_err(|Unresolved(reference)| ExpandError::UnresolvedReference {
            reference,
            node: node.to_string(),
        })
}

fn substitute_all(scope: &Scope, items: &[String], node: &str) -> Result<Vec<String>, ExpandError> {
    items.iter().map(|s| substitute(scope, s, node)).collect()
}

fn substitute_opt(
    scope: &Scope,
    text: Option<&String>,
    node: &str,
) -> Result<Option<String>, ExpandError> {
    text.map(|s| substitute(scope, s, node)).transpose()
}

fn substitute_container(
    container: &ContainerSpec,
    scope: &Scope,
    node: &str,
) -> Result<ContainerSpec, ExpandError> {
    Ok(ContainerSpec {
        image: substitute(scope, &container.image, node)?,
        command: substitute_all(scope, &container.command, node)?,
        args: substitute_all(scope, &container.args, node)?,
        env: container
            .env
            .iter()
            .map(|(k, v)| substitute(scope, v, node).map(|v| (k.clone(), v)))
            .collect::<Result<_, _>>()?,
    })
}

fn build_request(
    resource: &ResourceSpec,
    template_name: &str,
    scope: &Scope,
    node: &str,
) -> Result<ResourceActionRequest, ExpandError> {
    let success = substitute_opt(scope, resource.success_condition.as_ref(), node)?;
    let failure = substitute_opt(scope, resource.failure_condition.as_ref(), node)?;
    let compile = |expr: Option<&str>, which: &'static str| {
        Selector::parse_optional(expr).map_err(|source| ExpandError::InvalidSelector {
            template: template_name.to_string(),
            which,
            source,
        })
    };

    Ok(ResourceActionRequest {
        verb: resource.action,
        manifest: substitute_opt(scope, resource.manifest.as_ref(), node)?,
        manifest_path: substitute_opt(scope, resource.manifest_path.as_ref(), node)?,
        flags: substitute_all(scope, &resource.flags, node)?,
        merge_strategy: resource.merge_strategy.unwrap_or_default(),
        success: compile(success.as_deref(), "success")?,
        failure: compile(failure.as_deref(), "failure")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
