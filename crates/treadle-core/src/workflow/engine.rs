//! Node Scheduler / DAG Engine.
//!
//! A single coordinator task owns the node table. Leaf nodes run as
//! independent tasks in a `JoinSet` and report back a `NodeOutcome`; only the
//! coordinator writes phases, and it re-evaluates readiness of every pending
//! node after each terminal transition, so a dependent never observes a
//! dependency mid-transition.
//!
//! # Release rules
//!
//! - A node inside a group waits for the group to be `Running`; if the group
//!   was skipped, so is the node.
//! - A node waits until every dependency is terminal.
//! - `AllSucceeded`: any dependency that did not succeed skips the node.
//! - `AnyTerminal` (exit handlers, failure-tolerant edges): the node runs
//!   unless every dependency was skipped.
//! - A running group finishes once all its children are terminal: `Succeeded`
//!   when every non-exit child succeeded, `Failed` otherwise.
//!
//! The run is `Failed` if any non-exit node ended `Failed` or `Error`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use treadle_types::config::EngineConfig;
use treadle_types::error::{ConfigError, NodeError};
use treadle_types::event::WorkflowEvent;
use treadle_types::node::{Node, NodePhase, RunPolicy, WorkflowPhase};
use treadle_types::workflow::WorkflowSpec;
use uuid::Uuid;

use crate::client::{ContainerRuntime, ResourceClient};
use crate::event::bus::EventBus;

use super::container::ContainerExecutor;
use super::dag::{GraphError, validate_dag};
use super::expander::{ExpandError, NodeGraph, NodeKind, expand_workflow};
use super::outcome::NodeOutcome;
use super::resource::ResourceActionExecutor;

// ---------------------------------------------------------------------------
// Result and errors
// ---------------------------------------------------------------------------

/// Final state of a workflow run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub phase: WorkflowPhase,
    /// Every node, in expansion order.
    pub nodes: Vec<Node>,
}

impl RunReport {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Failures of the engine itself. Node failures are phases, not errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow expansion failed: {0}")]
    Expand(#[from] ExpandError),

    #[error("invalid node graph: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("run {0} is already active")]
    DuplicateRun(Uuid),

    #[error("node task failed: {0}")]
    TaskJoin(String),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs expanded workflows against injected resource and container backends.
pub struct WorkflowEngine<C: ResourceClient, R: ContainerRuntime> {
    resources: Arc<ResourceActionExecutor<C>>,
    containers: Arc<ContainerExecutor<R>>,
    event_bus: EventBus,
    max_parallelism: Option<u32>,
    /// Cancellation tokens keyed by run_id.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<C, R> WorkflowEngine<C, R>
where
    C: ResourceClient + 'static,
    R: ContainerRuntime + 'static,
{
    /// Build an engine from `config`, rejecting values no run could work
    /// with (zero poll interval, zero parallelism, empty retry budget).
    pub fn new(
        config: &EngineConfig,
        client: Arc<C>,
        runtime: Arc<R>,
        event_bus: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let resources = ResourceActionExecutor::new(
            client,
            config.resource.clone(),
            config.retry.clone(),
            config.manifest_dir(),
        )?
        .with_default_namespace(config.kubectl.namespace.clone());

        Ok(Self {
            resources: Arc::new(resources),
            containers: Arc::new(ContainerExecutor::new(runtime)),
            event_bus,
            max_parallelism: config.engine.max_parallelism,
            cancellation_tokens: DashMap::new(),
        })
    }

    /// Expand `spec` and run it to completion.
    pub async fn run(&self, run_id: Uuid, spec: &WorkflowSpec) -> Result<RunReport, EngineError> {
        let graph = expand_workflow(spec)?;
        self.execute(run_id, graph).await
    }

    /// Run an already expanded node graph to completion.
    pub async fn execute(&self, run_id: Uuid, graph: NodeGraph) -> Result<RunReport, EngineError> {
        validate_dag(&graph.nodes)?;

        let token = CancellationToken::new();
        if self.cancellation_tokens.contains_key(&run_id) {
            return Err(EngineError::DuplicateRun(run_id));
        }
        self.cancellation_tokens.insert(run_id, token.clone());

        let result = self.drive(run_id, graph, &token).await;

        self.cancellation_tokens.remove(&run_id);
        result
    }

    /// Request cancellation of an active run. Returns `false` if the run is
    /// unknown or already finished.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.cancellation_tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %run_id, "workflow cancellation requested");
                true
            }
            None => false,
        }
    }

    async fn drive(
        &self,
        run_id: Uuid,
        graph: NodeGraph,
        token: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let workflow = graph.workflow.clone();
        let mut run = RunState::new(run_id, graph);

        tracing::info!(run_id = %run_id, workflow = %workflow, nodes = run.nodes.len(), "workflow started");
        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id,
            workflow: workflow.clone(),
            node_count: run.nodes.len(),
        });

        let semaphore = self
            .max_parallelism
            .map(|n| Arc::new(Semaphore::new(n as usize)));
        let mut tasks: JoinSet<(usize, NodeOutcome)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            // A cancel can land in the same wakeup as a task completion, in
            // which case select! may only report the completion.
            if !cancelled && token.is_cancelled() {
                tracing::info!(run_id = %run_id, "workflow cancelled");
                cancelled = true;
            }
            while self.advance(&mut run, &mut tasks, semaphore.as_ref(), token, cancelled)? {}

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let (idx, outcome) = joined.map_err(|e| EngineError::TaskJoin(e.to_string()))?;
                    self.transition(&mut run, idx, outcome.phase, outcome.message)?;
                }
                _ = token.cancelled(), if !cancelled => {
                    tracing::info!(run_id = %run_id, "workflow cancelled");
                    cancelled = true;
                }
            }
        }

        for idx in 0..run.nodes.len() {
            if !run.nodes[idx].is_terminal() {
                self.transition(
                    &mut run,
                    idx,
                    NodePhase::Error,
                    Some("node never became runnable".to_string()),
                )?;
            }
        }

        // An accepted cancel always fails the run, even if every node it
        // touched had already finished.
        let phase = if cancelled || token.is_cancelled() {
            WorkflowPhase::Failed
        } else {
            workflow_phase(&run.nodes)
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(run_id = %run_id, workflow = %workflow, ?phase, duration_ms, "workflow finished");
        self.event_bus.publish(WorkflowEvent::RunFinished {
            run_id,
            workflow: workflow.clone(),
            phase,
            duration_ms,
        });

        Ok(RunReport {
            run_id,
            workflow,
            phase,
            nodes: run.nodes,
        })
    }

    /// One readiness pass over the table. Returns whether anything changed.
    fn advance(
        &self,
        run: &mut RunState,
        tasks: &mut JoinSet<(usize, NodeOutcome)>,
        semaphore: Option<&Arc<Semaphore>>,
        token: &CancellationToken,
        cancelled: bool,
    ) -> Result<bool, EngineError> {
        let mut progressed = false;

        for idx in 0..run.nodes.len() {
            match run.decide(idx, cancelled) {
                Decision::Wait => {}
                Decision::Finish(phase, message) | Decision::Skip(phase, message) => {
                    self.transition(run, idx, phase, Some(message))?;
                    progressed = true;
                }
                Decision::Start => {
                    if matches!(run.kinds[idx], NodeKind::Group) {
                        self.transition(run, idx, NodePhase::Running, None)?;
                        progressed = true;
                        continue;
                    }

                    let permit = match semaphore {
                        Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                            Ok(permit) => Some(permit),
                            Err(_) => continue,
                        },
                        None => None,
                    };
                    self.transition(run, idx, NodePhase::Running, None)?;
                    self.spawn_leaf(run, idx, tasks, permit, token);
                    progressed = true;
                }
            }
        }

        Ok(progressed)
    }

    fn spawn_leaf(
        &self,
        run: &RunState,
        idx: usize,
        tasks: &mut JoinSet<(usize, NodeOutcome)>,
        permit: Option<OwnedSemaphorePermit>,
        token: &CancellationToken,
    ) {
        let name = run.nodes[idx].name.clone();
        let kind = run.kinds[idx].clone();
        let resources = Arc::clone(&self.resources);
        let containers = Arc::clone(&self.containers);
        let token = token.clone();
        let span = tracing::info_span!("node", run_id = %run.run_id, node = %name, kind = kind.label());

        tasks.spawn(
            async move {
                let _permit = permit;
                let outcome = match kind {
                    NodeKind::Container(spec) => containers.execute(&name, &spec, &token).await,
                    NodeKind::Resource(request) => resources.execute(&name, &request, &token).await,
                    NodeKind::Group => NodeOutcome::error("group nodes have no work of their own"),
                };
                (idx, outcome)
            }
            .instrument(span),
        );
    }

    fn transition(
        &self,
        run: &mut RunState,
        idx: usize,
        phase: NodePhase,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let node = &mut run.nodes[idx];
        node.transition(phase, message)?;

        match phase {
            NodePhase::Failed | NodePhase::Error => tracing::warn!(
                run_id = %run.run_id,
                node = %node.name,
                %phase,
                message = node.message.as_deref().unwrap_or(""),
                "node finished unsuccessfully"
            ),
            _ => tracing::debug!(run_id = %run.run_id, node = %node.name, %phase, "node phase changed"),
        }

        self.event_bus.publish(WorkflowEvent::NodePhaseChanged {
            run_id: run.run_id,
            node: node.name.clone(),
            phase,
            message: node.message.clone(),
        });
        Ok(())
    }
}

/// `Failed` if any non-exit node failed or errored.
fn workflow_phase(nodes: &[Node]) -> WorkflowPhase {
    if nodes
        .iter()
        .any(|n| !n.exit_handler && n.phase.is_unsuccessful())
    {
        WorkflowPhase::Failed
    } else {
        WorkflowPhase::Succeeded
    }
}

// ---------------------------------------------------------------------------
// Node table
// ---------------------------------------------------------------------------

enum Decision {
    Wait,
    Start,
    Skip(NodePhase, String),
    Finish(NodePhase, String),
}

/// The node table of one run plus index-based adjacency.
struct RunState {
    run_id: Uuid,
    nodes: Vec<Node>,
    kinds: Vec<NodeKind>,
    dependencies: Vec<Vec<usize>>,
    boundary: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl RunState {
    fn new(run_id: Uuid, graph: NodeGraph) -> Self {
        let index: HashMap<String, usize> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node.name.clone(), i))
            .collect();

        let (nodes, kinds): (Vec<Node>, Vec<NodeKind>) =
            graph.nodes.into_iter().map(|n| (n.node, n.kind)).unzip();

        let dependencies = nodes
            .iter()
            .map(|n| {
                n.dependencies
                    .iter()
                    .filter_map(|d| index.get(d).copied())
                    .collect()
            })
            .collect();
        let boundary: Vec<Option<usize>> = nodes
            .iter()
            .map(|n| n.boundary_id.as_ref().and_then(|b| index.get(b).copied()))
            .collect();
        let mut children = vec![Vec::new(); nodes.len()];
        for (child, parent) in boundary.iter().enumerate() {
            if let Some(parent) = parent {
                children[*parent].push(child);
            }
        }

        Self {
            run_id,
            nodes,
            kinds,
            dependencies,
            boundary,
            children,
        }
    }

    fn decide(&self, idx: usize, cancelled: bool) -> Decision {
        let node = &self.nodes[idx];
        match node.phase {
            NodePhase::Running if matches!(self.kinds[idx], NodeKind::Group) => self.group_result(idx),
            NodePhase::Pending => self.release(idx, cancelled),
            _ => Decision::Wait,
        }
    }

    fn release(&self, idx: usize, cancelled: bool) -> Decision {
        let node = &self.nodes[idx];
        if cancelled {
            return Decision::Skip(NodePhase::Skipped, "workflow cancelled".to_string());
        }

        if let Some(parent) = self.boundary[idx] {
            let parent = &self.nodes[parent];
            match parent.phase {
                NodePhase::Running => {}
                NodePhase::Pending => return Decision::Wait,
                phase => {
                    return Decision::Skip(
                        NodePhase::Skipped,
                        format!("parent '{}' ended {phase}", parent.name),
                    );
                }
            }
        }

        let deps: Vec<&Node> = self.dependencies[idx].iter().map(|&d| &self.nodes[d]).collect();
        if deps.iter().any(|d| !d.is_terminal()) {
            return Decision::Wait;
        }

        match node.run_policy {
            RunPolicy::AllSucceeded => {
                if let Some(dep) = deps.iter().find(|d| d.phase != NodePhase::Succeeded) {
                    return Decision::Skip(
                        NodePhase::Skipped,
                        format!("dependency '{}' ended {}", dep.name, dep.phase),
                    );
                }
            }
            RunPolicy::AnyTerminal => {
                if !deps.is_empty() && deps.iter().all(|d| d.phase == NodePhase::Skipped) {
                    return Decision::Skip(
                        NodePhase::Skipped,
                        "all dependencies were skipped".to_string(),
                    );
                }
            }
        }

        Decision::Start
    }

    fn group_result(&self, idx: usize) -> Decision {
        let group = &self.nodes[idx];
        let children: Vec<&Node> = self.children[idx].iter().map(|&c| &self.nodes[c]).collect();
        if children.iter().any(|c| !c.is_terminal()) {
            return Decision::Wait;
        }

        let unsuccessful: Vec<&str> = children
            .iter()
            .filter(|c| group.exit_handler || !c.exit_handler)
            .filter(|c| c.phase != NodePhase::Succeeded)
            .map(|c| c.name.as_str())
            .collect();

        if unsuccessful.is_empty() {
            Decision::Finish(NodePhase::Succeeded, format!("{} child nodes succeeded", children.len()))
        } else {
            Decision::Finish(
                NodePhase::Failed,
                format!("child nodes did not succeed: {}", unsuccessful.join(", ")),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
