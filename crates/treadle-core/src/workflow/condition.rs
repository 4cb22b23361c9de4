//! Success/failure condition matching against observed resource state.
//!
//! A condition expression is a comma-separated conjunction of field-path
//! requirements, in the style of label selectors:
//!
//! ```text
//! status.phase == Succeeded, status.failed < 3
//! status.phase in (Failed, Error)
//! metadata.deletionTimestamp          (exists)
//! !status.completionTime              (does not exist)
//! ```
//!
//! Paths are dotted and navigated from the document root; numeric segments
//! index into arrays. An absent field satisfies only `!path`.

use std::fmt;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A condition expression could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("invalid requirement '{requirement}': {reason}")]
    InvalidRequirement { requirement: String, reason: String },
}

/// The state document could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("malformed state document: {0}")]
    MalformedDocument(String),
}

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Operator {
    Equals(String),
    NotEquals(String),
    In(Vec<String>),
    NotIn(Vec<String>),
    Exists,
    DoesNotExist,
    GreaterThan(f64),
    LessThan(f64),
}

#[derive(Debug, Clone, PartialEq)]
struct Requirement {
    path: Vec<String>,
    op: Operator,
}

impl Requirement {
    fn matches(&self, doc: &Value) -> bool {
        let field = lookup(doc, &self.path);
        match (&self.op, field) {
            (Operator::DoesNotExist, field) => field.is_none(),
            (_, None) => false,
            (Operator::Exists, Some(_)) => true,
            (Operator::Equals(want), Some(v)) => field_string(v) == *want,
            (Operator::NotEquals(want), Some(v)) => field_string(v) != *want,
            (Operator::In(set), Some(v)) => set.contains(&field_string(v)),
            (Operator::NotIn(set), Some(v)) => !set.contains(&field_string(v)),
            (Operator::GreaterThan(n), Some(v)) => field_number(v).is_some_and(|x| x > *n),
            (Operator::LessThan(n), Some(v)) => field_number(v).is_some_and(|x| x < *n),
        }
    }
}

/// Navigate a dotted path. JSON `null` counts as absent.
fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() { None } else { Some(current) }
}

fn field_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn field_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// A compiled condition expression: the conjunction of its requirements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selector {
    expression: String,
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Compile an expression. An empty or whitespace-only expression yields
    /// an empty selector.
    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for part in split_top_level(expression) {
            let part = part.trim();
            if part.is_empty() {
                if expression.trim().is_empty() {
                    continue;
                }
                return Err(SelectorError::InvalidRequirement {
                    requirement: expression.to_string(),
                    reason: "empty requirement".to_string(),
                });
            }
            requirements.push(parse_requirement(part)?);
        }
        Ok(Self {
            expression: expression.trim().to_string(),
            requirements,
        })
    }

    /// Compile an optional expression; `None` yields an empty selector.
    pub fn parse_optional(expression: Option<&str>) -> Result<Self, SelectorError> {
        expression.map_or_else(|| Ok(Self::default()), Self::parse)
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// True when every requirement holds. An empty selector matches everything.
    pub fn matches(&self, doc: &Value) -> bool {
        self.requirements.iter().all(|r| r.matches(doc))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Split on commas that are not inside parentheses.
fn split_top_level(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/')
}

fn parse_requirement(text: &str) -> Result<Requirement, SelectorError> {
    let invalid = |reason: &str| SelectorError::InvalidRequirement {
        requirement: text.to_string(),
        reason: reason.to_string(),
    };

    if let Some(rest) = text.strip_prefix('!') {
        let path = rest.trim();
        if path.is_empty() || !path.chars().all(is_path_char) {
            return Err(invalid("expected a field path after '!'"));
        }
        return Ok(Requirement {
            path: split_path(path).map_err(|r| invalid(&r))?,
            op: Operator::DoesNotExist,
        });
    }

    let path_end = text.find(|c: char| !is_path_char(c)).unwrap_or(text.len());
    let path = split_path(&text[..path_end]).map_err(|r| invalid(&r))?;
    let rest = text[path_end..].trim_start();

    if rest.is_empty() {
        return Ok(Requirement {
            path,
            op: Operator::Exists,
        });
    }

    let op = if let Some(v) = rest.strip_prefix("==") {
        Operator::Equals(single_value(v).map_err(|r| invalid(&r))?)
    } else if let Some(v) = rest.strip_prefix("!=") {
        Operator::NotEquals(single_value(v).map_err(|r| invalid(&r))?)
    } else if let Some(v) = rest.strip_prefix('=') {
        Operator::Equals(single_value(v).map_err(|r| invalid(&r))?)
    } else if let Some(v) = rest.strip_prefix('>') {
        Operator::GreaterThan(number_value(v).map_err(|r| invalid(&r))?)
    } else if let Some(v) = rest.strip_prefix('<') {
        Operator::LessThan(number_value(v).map_err(|r| invalid(&r))?)
    } else if let Some(v) = rest.strip_prefix("notin") {
        Operator::NotIn(value_set(v).map_err(|r| invalid(&r))?)
    } else if let Some(v) = rest.strip_prefix("in") {
        Operator::In(value_set(v).map_err(|r| invalid(&r))?)
    } else {
        return Err(invalid("unknown operator"));
    };

    Ok(Requirement { path, op })
}

fn split_path(path: &str) -> Result<Vec<String>, String> {
    if path.is_empty() {
        return Err("missing field path".to_string());
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(format!("empty segment in path '{path}'"));
    }
    Ok(segments)
}

fn single_value(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("missing value".to_string());
    }
    if value.chars().any(|c| c.is_whitespace() || c == '(' || c == ')') {
        return Err(format!("value '{value}' must be a single token"));
    }
    Ok(value.to_string())
}

fn number_value(raw: &str) -> Result<f64, String> {
    let value = single_value(raw)?;
    value
        .parse::<f64>()
        .map_err(|_| format!("value '{value}' is not a number"))
}

fn value_set(raw: &str) -> Result<Vec<String>, String> {
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| "expected a parenthesized value list".to_string())?;
    inner.split(',').map(single_value).collect()
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Result of evaluating one state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// The success selector matched; the action is complete.
    Succeeded,
    /// The failure selector matched; the action definitively failed.
    Failed { reason: String },
    /// Neither selector matched on this snapshot; poll again.
    Inconclusive,
}

/// Evaluate a raw state document against the success and failure selectors.
///
/// The failure selector is evaluated first and wins over the success
/// selector. An empty failure selector never matches; an empty success
/// selector is satisfied by any document the failure selector rejects.
pub fn match_conditions(
    document: &[u8],
    success: &Selector,
    failure: &Selector,
) -> Result<ConditionOutcome, ConditionError> {
    let doc: Value = serde_json::from_slice(document)
        .map_err(|e| ConditionError::MalformedDocument(e.to_string()))?;

    if !failure.is_empty() && failure.matches(&doc) {
        return Ok(ConditionOutcome::Failed {
            reason: format!("failure condition '{failure}' evaluated true"),
        });
    }

    if success.matches(&doc) {
        return Ok(ConditionOutcome::Succeeded);
    }

    Ok(ConditionOutcome::Inconclusive)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
