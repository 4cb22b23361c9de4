//! Capability traits (ports) for the systems the engine drives.
//!
//! The engine never talks to a cluster or a container runtime directly. The
//! infrastructure layer (treadle-infra) implements these traits; tests use
//! scripted fakes.

pub mod container;
pub mod resource;

pub use container::{ContainerError, ContainerHandle, ContainerRuntime};
pub use resource::{ResourceApiError, ResourceClient};
