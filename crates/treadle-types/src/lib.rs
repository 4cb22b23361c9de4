//! Shared domain types for Treadle.
//!
//! Templates, runtime nodes and their phases, resource identity, events, and
//! engine configuration. No async runtime or I/O dependencies.

pub mod config;
pub mod error;
pub mod event;
pub mod node;
pub mod resource;
pub mod workflow;
