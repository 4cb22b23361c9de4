//! Container node driver: start, wait, read the exit status.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use treadle_types::workflow::ContainerSpec;

use crate::client::ContainerRuntime;

use super::outcome::NodeOutcome;

/// Runs Container-template nodes through an injected [`ContainerRuntime`].
pub struct ContainerExecutor<R: ContainerRuntime> {
    runtime: Arc<R>,
}

impl<R: ContainerRuntime> ContainerExecutor<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// Exit code 0 is `Succeeded`, any other code `Failed`; runtime errors and
    /// cancellation are `Error`.
    pub async fn execute(
        &self,
        node: &str,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> NodeOutcome {
        let handle = tokio::select! {
            _ = cancel.cancelled() => return NodeOutcome::cancelled(),
            started = self.runtime.start(node, spec) => match started {
                Ok(handle) => handle,
                Err(e) => return NodeOutcome::error(e.to_string()),
            },
        };
        tracing::debug!(node, image = %spec.image, container = %handle.0, "container started");

        tokio::select! {
            _ = cancel.cancelled() => return NodeOutcome::cancelled(),
            waited = self.runtime.wait(&handle) => {
                if let Err(e) = waited {
                    return NodeOutcome::error(e.to_string());
                }
            }
        }

        match self.runtime.exit_status(&handle).await {
            Ok(0) => NodeOutcome::succeeded(),
            Ok(code) => NodeOutcome::failed(format!("exit code {code}")),
            Err(e) => NodeOutcome::error(e.to_string()),
        }
    }
}
