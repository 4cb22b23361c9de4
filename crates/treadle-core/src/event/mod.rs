//! Event bus for workflow run observers.
//!
//! `EventBus` carries `WorkflowEvent`s from the engine to any number of
//! observers; `RunEvents` follows one run.

pub mod bus;

pub use bus::{EventBus, RunEvents};
