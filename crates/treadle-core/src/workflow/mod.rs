//! Workflow engine core: matching, command construction, expansion, and scheduling.
//!
//! - `condition` -- label-selector matcher for success/failure conditions
//! - `command` -- argument builder for resource actions
//! - `resource` -- resource action executor (invoke, then poll conditions)
//! - `container` -- container node driver
//! - `scope` -- `{{ ... }}` parameter substitution
//! - `expander` -- template expansion into a node graph
//! - `dag` -- dependency validation and cycle detection
//! - `engine` -- node scheduler driving the graph to completion
//! - `retry` -- backoff policy for transient failures
//! - `definition` -- YAML parsing, validation, filesystem load/save

pub mod command;
pub mod condition;
pub mod container;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod expander;
pub mod outcome;
pub mod resource;
pub mod retry;
pub mod scope;
