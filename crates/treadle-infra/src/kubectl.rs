//! `kubectl`-backed [`ResourceClient`].
//!
//! Every action shells out to the configured binary and returns its stdout.
//! Failures are classified from stderr: connection trouble and server-side
//! errors are transient, everything else (validation, not found, forbidden)
//! is permanent.

use std::process::Output;

use anyhow::Context;
use treadle_core::client::{ResourceApiError, ResourceClient};
use treadle_types::config::KubectlConfig;
use treadle_types::resource::ResourceRef;

/// Substrings of `kubectl` stderr that mark a retryable failure.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset by peer",
    "i/o timeout",
    "tls handshake timeout",
    "unable to connect to the server",
    "context deadline exceeded",
    "internalerror",
    "internal error",
    "serviceunavailable",
    "service unavailable",
    "toomanyrequests",
    "too many requests",
    "the server is currently unable to handle the request",
    "etcdserver: request timed out",
];

/// Runs resource actions through the `kubectl` CLI.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    namespace: Option<String>,
}

impl KubectlClient {
    pub fn new(config: &KubectlConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            namespace: config.namespace.clone(),
        }
    }

    /// Arguments for reading the current state of `resource`.
    pub fn state_arguments(&self, resource: &ResourceRef) -> Vec<String> {
        let mut args = vec![
            "get".to_string(),
            format!("{}/{}", resource.kind, resource.name),
        ];
        if let Some(ns) = resource.namespace.as_ref().or(self.namespace.as_ref()) {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        args.push("-o".to_string());
        args.push("json".to_string());
        args
    }

    /// Dropping the returned future kills the child.
    async fn run(&self, args: &[String]) -> anyhow::Result<Output> {
        tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary))
    }

    async fn call(&self, args: &[String]) -> Result<Vec<u8>, ResourceApiError> {
        tracing::debug!(binary = %self.binary, args = ?args, "running kubectl");

        let output = match self.run(args).await {
            Ok(output) => output,
            Err(e) => return Err(ResourceApiError::Permanent(format!("{e:#}"))),
        };

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let err = classify_failure(stderr.trim());
        tracing::debug!(status = %output.status, transient = err.is_transient(), "kubectl failed");
        Err(err)
    }
}

/// Classify a failed invocation by its error output.
pub fn classify_failure(stderr: &str) -> ResourceApiError {
    let message = if stderr.is_empty() {
        "kubectl exited unsuccessfully".to_string()
    } else {
        stderr.to_string()
    };

    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ResourceApiError::Transient(message)
    } else {
        ResourceApiError::Permanent(message)
    }
}

impl ResourceClient for KubectlClient {
    fn invoke(
        &self,
        args: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ResourceApiError>> + Send {
        self.call(args)
    }

    fn fetch_state(
        &self,
        resource: &ResourceRef,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ResourceApiError>> + Send {
        let args = self.state_arguments(resource);
        async move { self.call(&args).await }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
