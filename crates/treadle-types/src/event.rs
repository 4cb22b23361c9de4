//! Events published while a workflow run progresses.
//!
//! Observers subscribe through the core `EventBus`. Events are informational;
//! the engine's node table stays the source of truth.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::{NodePhase, WorkflowPhase};

/// A state change inside a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
        node_count: usize,
    },
    NodePhaseChanged {
        run_id: Uuid,
        node: String,
        phase: NodePhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    RunFinished {
        run_id: Uuid,
        workflow: String,
        phase: WorkflowPhase,
        duration_ms: u64,
    },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::NodePhaseChanged { run_id, .. }
            | WorkflowEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}
