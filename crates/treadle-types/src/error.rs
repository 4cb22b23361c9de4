use thiserror::Error;

use crate::node::NodePhase;

/// Errors raised by the node state machine.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node '{node}' cannot move from {from} to {to}")]
    IllegalTransition {
        node: String,
        from: NodePhase,
        to: NodePhase,
    },
}

/// Errors related to engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_display() {
        let err = NodeError::IllegalTransition {
            node: "wf.a".to_string(),
            from: NodePhase::Succeeded,
            to: NodePhase::Running,
        };
        assert_eq!(
            err.to_string(),
            "node 'wf.a' cannot move from Succeeded to Running"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid("poll interval must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: poll interval must be > 0"
        );
    }
}
