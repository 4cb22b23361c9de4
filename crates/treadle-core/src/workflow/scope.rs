//! Parameter scope and `{{ ... }}` substitution for template expansion.
//!
//! Supported references:
//! - `{{workflow.name}}`
//! - `{{workflow.parameters.<name>}}`
//! - `{{inputs.parameters.<name>}}`
//! - `{{item}}` and `{{item.<field>}}` inside a looping step or task
//!
//! Whitespace inside the braces is ignored. Every reference must resolve.

use std::collections::BTreeMap;

use serde_json::Value;
use treadle_types::workflow::WorkflowSpec;

/// Values visible to substitution at one point of the expansion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    values: BTreeMap<String, String>,
}

/// A `{{ ... }}` reference had no binding in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved(pub String);

impl Scope {
    /// Workflow-wide values: the name and the workflow arguments.
    pub fn for_workflow(spec: &WorkflowSpec) -> Self {
        let mut values = BTreeMap::new();
        values.insert("workflow.name".to_string(), spec.name.clone());
        for (name, value) in &spec.arguments {
            values.insert(format!("workflow.parameters.{name}"), value.clone());
        }
        Self { values }
    }

    /// Scope for a template body: workflow values plus the template's
    /// resolved inputs. Loop items and the caller's inputs are not visible.
    pub fn for_template(&self, inputs: &BTreeMap<String, String>) -> Self {
        let mut values: BTreeMap<String, String> = self
            .values
            .iter()
            .filter(|(k, _)| k.starts_with("workflow."))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in inputs {
            values.insert(format!("inputs.parameters.{name}"), value.clone());
        }
        Self { values }
    }

    /// This scope with a loop item bound.
    pub fn with_item(&self, item: &Value) -> Self {
        let mut values = self.values.clone();
        values.insert("item".to_string(), value_to_string(item));
        if let Value::Object(fields) = item {
            for (field, value) in fields {
                values.insert(format!("item.{field}"), value_to_string(value));
            }
        }
        Self { values }
    }

    /// Replace every `{{ ... }}` reference in `text`.
    ///
    /// An opening `{{` without a closing `}}` is left as literal text.
    pub fn substitute(&self, text: &str) -> Result<String, Unresolved> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let key = rest[start + 2..start + 2 + len].trim();
            let value = self
                .values
                .get(key)
                .ok_or_else(|| Unresolved(key.to_string()))?;
            out.push_str(&rest[..start]);
            out.push_str(value);
            rest = &rest[start + 2 + len + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// Loop-node label for an item: the scalar itself, or `key:value` pairs
/// joined with commas for objects.
pub fn item_label(item: &Value) -> String {
    match item {
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| format!("{k}:{}", value_to_string(v)))
            .collect::<Vec<_>>()
            .join(","),
        other => value_to_string(other),
    }
}

/// Render a JSON value as a plain string (strings without quotes).
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
