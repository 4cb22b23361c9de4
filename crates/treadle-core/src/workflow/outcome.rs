//! Terminal result of driving one leaf node.

use treadle_types::node::NodePhase;

/// The phase a leaf node ends in plus its operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    pub phase: NodePhase,
    pub message: Option<String>,
}

impl NodeOutcome {
    pub fn succeeded() -> Self {
        Self {
            phase: NodePhase::Succeeded,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: NodePhase::Failed,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: NodePhase::Error,
            message: Some(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self::error("cancelled")
    }
}
