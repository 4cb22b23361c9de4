//! Business logic and capability traits for Treadle.
//!
//! This crate defines the "ports" (`ResourceClient`, `ContainerRuntime`) that
//! the infrastructure layer implements. It depends only on `treadle-types` --
//! never on `treadle-infra` or any process/IO adapter.

pub mod client;
pub mod event;
pub mod workflow;
