//! Runtime node records and the node phase state machine.
//!
//! A `Node` is one instantiation of a template inside a workflow run. Its
//! phase moves `Pending -> Running -> {Succeeded | Failed | Error | Skipped}`
//! (or straight from `Pending` to a terminal phase when the node never
//! starts). Terminal phases are final.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Lifecycle phase of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Pending,
    Running,
    Succeeded,
    /// The action itself failed (failure condition, permanent rejection, non-zero exit).
    Failed,
    /// The node could not be driven to an answer (construction error, timeout,
    /// exhausted retries, cancellation).
    Error,
    Skipped,
}

impl NodePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodePhase::Succeeded | NodePhase::Failed | NodePhase::Error | NodePhase::Skipped
        )
    }

    /// Failed or Error.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, NodePhase::Failed | NodePhase::Error)
    }

    fn can_transition_to(&self, to: NodePhase) -> bool {
        match self {
            NodePhase::Pending => to != NodePhase::Pending && to != NodePhase::Succeeded,
            NodePhase::Running => to.is_terminal() && to != NodePhase::Skipped,
            _ => false,
        }
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodePhase::Pending => "Pending",
            NodePhase::Running => "Running",
            NodePhase::Succeeded => "Succeeded",
            NodePhase::Failed => "Failed",
            NodePhase::Error => "Error",
            NodePhase::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Terminal status of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Running,
    Succeeded,
    Failed,
}

/// When a node is allowed to run once its dependencies are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPolicy {
    /// Every dependency must have succeeded; otherwise the node is skipped.
    #[default]
    AllSucceeded,
    /// Any terminal outcome of the dependencies releases the node, unless all
    /// of them were skipped. Used by exit handlers and failure-tolerant edges.
    AnyTerminal,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A runtime instantiation of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the run (e.g. `wf[0].build(1:arm64)`).
    pub name: String,
    pub template_name: String,
    pub phase: NodePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Resolved input parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    /// Human-readable status or failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Names of nodes that must be terminal before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Name of the enclosing composite node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_id: Option<String>,
    #[serde(default)]
    pub run_policy: RunPolicy,
    /// True for exit handlers and everything expanded beneath them.
    #[serde(default)]
    pub exit_handler: bool,
}

impl Node {
    /// Create a pending node with no dependencies.
    pub fn new(name: impl Into<String>, template_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_name: template_name.into(),
            phase: NodePhase::Pending,
            started_at: None,
            finished_at: None,
            inputs: BTreeMap::new(),
            message: None,
            dependencies: Vec::new(),
            boundary_id: None,
            run_policy: RunPolicy::AllSucceeded,
            exit_handler: false,
        }
    }

    /// Move the node to `to`, stamping start/finish times.
    ///
    /// Rejects any transition out of a terminal phase and any transition the
    /// lifecycle does not allow (e.g. `Pending -> Succeeded`).
    pub fn transition(
        &mut self,
        to: NodePhase,
        message: Option<String>,
    ) -> Result<(), NodeError> {
        if !self.phase.can_transition_to(to) {
            return Err(NodeError::IllegalTransition {
                node: self.name.clone(),
                from: self.phase,
                to,
            });
        }

        let now = Utc::now();
        if to == NodePhase::Running {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        self.phase = to;
        if message.is_some() {
            self.message = message;
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_lifecycle() {
        let mut node = Node::new("wf.a", "a");
        node.transition(NodePhase::Running, None).unwrap();
        assert!(node.started_at.is_some());
        assert!(node.finished_at.is_none());

        node.transition(NodePhase::Succeeded, Some("done".into())).unwrap();
        assert!(node.is_terminal());
        assert!(node.finished_at.is_some());
        assert_eq!(node.message.as_deref(), Some("done"));
    }

    #[test]
    fn test_terminal_phase_is_final() {
        let mut node = Node::new("wf.a", "a");
        node.transition(NodePhase::Running, None).unwrap();
        node.transition(NodePhase::Failed, Some("boom".into())).unwrap();

        for to in [NodePhase::Pending, NodePhase::Running, NodePhase::Succeeded] {
            let err = node.transition(to, None).unwrap_err();
            assert!(err.to_string().contains("Failed"), "got: {err}");
        }
        assert_eq!(node.phase, NodePhase::Failed);
        assert_eq!(node.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_pending_can_skip_or_error_without_running() {
        let mut skipped = Node::new("wf.b", "b");
        skipped.transition(NodePhase::Skipped, None).unwrap();
        assert!(skipped.started_at.is_none());

        let mut errored = Node::new("wf.c", "c");
        errored.transition(NodePhase::Error, Some("bad manifest".into())).unwrap();
        assert_eq!(errored.phase, NodePhase::Error);
    }

    #[test]
    fn test_pending_cannot_succeed_without_running() {
        let mut node = Node::new("wf.a", "a");
        assert!(node.transition(NodePhase::Succeeded, None).is_err());
    }

    #[test]
    fn test_running_cannot_be_skipped() {
        let mut node = Node::new("wf.a", "a");
        node.transition(NodePhase::Running, None).unwrap();
        assert!(node.transition(NodePhase::Skipped, None).is_err());
    }

    #[test]
    fn test_phase_helpers() {
        assert!(NodePhase::Error.is_unsuccessful());
        assert!(NodePhase::Failed.is_unsuccessful());
        assert!(!NodePhase::Skipped.is_unsuccessful());
        assert!(!NodePhase::Running.is_terminal());
        assert_eq!(NodePhase::Succeeded.to_string(), "Succeeded");
    }
}
