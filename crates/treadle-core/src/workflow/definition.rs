//! Workflow definition parsing and validation.
//!
//! Reads YAML into `WorkflowSpec` and checks that every template reference
//! resolves before anything is expanded.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use treadle_types::workflow::{TemplateBody, WorkflowSpec};

use super::dag::validate_dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while reading a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowSpec`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowSpec, DefinitionError> {
    let spec: WorkflowSpec =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_workflow(&spec)?;
    Ok(spec)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowSpec`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - Template names are non-empty and unique
/// - The entrypoint and every `on_exit` exist
/// - Every step and task references an existing template
/// - Step names are unique within their group
/// - DAG tasks are unique, reference known tasks, and form no cycle
pub fn validate_workflow(spec: &WorkflowSpec) -> Result<(), DefinitionError> {
    if spec.name.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !spec.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(DefinitionError::Validation(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            spec.name
        )));
    }

    let mut names = HashSet::new();
    for template in &spec.templates {
        if template.name.is_empty() {
            return Err(DefinitionError::Validation(
                "template name must not be empty".to_string(),
            ));
        }
        if !names.insert(template.name.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate template name: '{}'",
                template.name
            )));
        }
    }

    let require = |template: &str, referenced_by: &str| {
        if names.contains(template) {
            Ok(())
        } else {
            Err(DefinitionError::Validation(format!(
                "{referenced_by} references unknown template '{template}'"
            )))
        }
    };

    require(&spec.entrypoint, "entrypoint")?;
    if let Some(exit) = &spec.on_exit {
        require(exit, "workflow on_exit")?;
    }

    for template in &spec.templates {
        if let Some(exit) = &template.on_exit {
            require(exit, &format!("template '{}' on_exit", template.name))?;
        }

        match &template.body {
            TemplateBody::Steps(groups) => {
                for (i, group) in groups.iter().enumerate() {
                    let mut seen = HashSet::new();
                    for step in group {
                        if !seen.insert(step.name.as_str()) {
                            return Err(DefinitionError::Validation(format!(
                                "template '{}' group {i} has duplicate step '{}'",
                                template.name, step.name
                            )));
                        }
                        let by = format!("step '{}' in template '{}'", step.name, template.name);
                        require(&step.template, &by)?;
                        if let Some(exit) = &step.on_exit {
                            require(exit, &format!("{by} on_exit"))?;
                        }
                    }
                }
            }
            TemplateBody::Dag(dag) => {
                validate_dag(&dag.tasks).map_err(|e| {
                    DefinitionError::Validation(format!("template '{}': {e}", template.name))
                })?;
                for task in &dag.tasks {
                    let by = format!("task '{}' in template '{}'", task.name, template.name);
                    require(&task.template, &by)?;
                    if let Some(exit) = &task.on_exit {
                        require(exit, &format!("{by} on_exit"))?;
                    }
                }
            }
            TemplateBody::Container(_) | TemplateBody::Resource(_) => {}
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub async fn load_workflow_file(path: &Path) -> Result<WorkflowSpec, DefinitionError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
