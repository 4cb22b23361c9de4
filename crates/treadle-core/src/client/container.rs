//! Container execution capability.
//!
//! Only the lifecycle boundary is modelled: start, wait for completion, read
//! the exit status. Log streaming and artifacts live outside the engine.

use treadle_types::workflow::ContainerSpec;

/// Opaque handle to a started container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    #[error("failed to start container: {0}")]
    Start(String),

    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Runs the container behind a Container-template node.
pub trait ContainerRuntime: Send + Sync {
    /// Start `spec` for the node named `node`.
    fn start(
        &self,
        node: &str,
        spec: &ContainerSpec,
    ) -> impl std::future::Future<Output = Result<ContainerHandle, ContainerError>> + Send;

    /// Resolve once the container has exited.
    fn wait(
        &self,
        handle: &ContainerHandle,
    ) -> impl std::future::Future<Output = Result<(), ContainerError>> + Send;

    /// Exit code of a finished container.
    fn exit_status(
        &self,
        handle: &ContainerHandle,
    ) -> impl std::future::Future<Output = Result<i32, ContainerError>> + Send;
}
