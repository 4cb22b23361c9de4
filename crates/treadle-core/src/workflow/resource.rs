//! Resource Action Executor: drives one Resource-template node to a terminal
//! phase.
//!
//! # Flow
//!
//! 1. Materialize an inline manifest to a per-call temporary file and build
//!    the argument list. The file is removed once the invoke returns.
//!    Build failures end the node in `Error`.
//! 2. Invoke the action. Transient errors are retried with backoff; permanent
//!    rejections end the node in `Failed`.
//! 3. `delete`, and actions without conditions, succeed once the invoke does.
//! 4. Otherwise poll the acted-upon object and run the condition matcher until
//!    it reports success or failure, or the poll timeout elapses (`Error`).
//!
//! Every suspension point (in-flight call, poll sleep, backoff sleep) is
//! raced against the run's cancellation token.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempPath;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use treadle_types::config::{BackoffConfig, ResourcePollConfig};
use treadle_types::error::ConfigError;
use treadle_types::resource::{MergeStrategy, ResourceRef, ResourceVerb};

use crate::client::{ResourceApiError, ResourceClient};

use super::command::build_arguments;
use super::condition::{ConditionOutcome, Selector, match_conditions};
use super::outcome::NodeOutcome;
use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything needed to run one resource action. Built once per node by the
/// expander, with parameters substituted and selectors compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceActionRequest {
    pub verb: ResourceVerb,
    pub manifest: Option<String>,
    pub manifest_path: Option<String>,
    pub flags: Vec<String>,
    pub merge_strategy: MergeStrategy,
    pub success: Selector,
    pub failure: Selector,
}

impl ResourceActionRequest {
    fn has_conditions(&self) -> bool {
        !self.success.is_empty() || !self.failure.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs resource actions through an injected [`ResourceClient`].
pub struct ResourceActionExecutor<C: ResourceClient> {
    client: Arc<C>,
    poll: ResourcePollConfig,
    retry: BackoffConfig,
    manifest_dir: PathBuf,
    default_namespace: Option<String>,
}

/// Outcome of a single retried call.
enum CallResult {
    Ok(Vec<u8>),
    Done(NodeOutcome),
}

impl<C: ResourceClient> ResourceActionExecutor<C> {
    /// Rejects a poll or retry configuration that could never settle a node,
    /// such as a zero poll interval.
    pub fn new(
        client: Arc<C>,
        poll: ResourcePollConfig,
        retry: BackoffConfig,
        manifest_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        poll.validate()?;
        retry.validate()?;
        Ok(Self {
            client,
            poll,
            retry,
            manifest_dir,
            default_namespace: None,
        })
    }

    /// Namespace assumed when the response document carries none.
    pub fn with_default_namespace(mut self, namespace: Option<String>) -> Self {
        self.default_namespace = namespace;
        self
    }

    /// Drive `request` for the node named `node` to a terminal outcome.
    pub async fn execute(
        &self,
        node: &str,
        request: &ResourceActionRequest,
        cancel: &CancellationToken,
    ) -> NodeOutcome {
        // Held until the invoke returns; dropping it removes the file.
        let (manifest_path, inline_manifest) = match self.manifest_path(node, request).await {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };

        let args = match build_arguments(
            request.verb,
            &manifest_path,
            &request.flags,
            request.merge_strategy,
        )
        .await
        {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(node, error = %e, "resource command could not be built");
                return NodeOutcome::error(e.to_string());
            }
        };

        tracing::debug!(node, verb = %request.verb, "invoking resource action");
        let response = match self.invoke_with_retry(node, &args, cancel).await {
            CallResult::Ok(bytes) => bytes,
            CallResult::Done(outcome) => return outcome,
        };
        drop(inline_manifest);

        if request.verb == ResourceVerb::Delete || !request.has_conditions() {
            return NodeOutcome::succeeded();
        }

        let Some(resource) = self.identity_of(&response) else {
            return NodeOutcome::error(
                "could not determine the resource acted upon from the action response",
            );
        };

        self.poll_until_done(node, &resource, request, cancel).await
    }

    /// Resolve the manifest file to hand to the builder. An inline manifest
    /// is written to a fresh file under `manifest_dir`, unique per call, and
    /// returned alongside its handle.
    async fn manifest_path(
        &self,
        node: &str,
        request: &ResourceActionRequest,
    ) -> Result<(String, Option<TempPath>), NodeOutcome> {
        if let Some(path) = &request.manifest_path {
            return Ok((path.clone(), None));
        }
        let Some(manifest) = &request.manifest else {
            return Ok((String::new(), None));
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.manifest_dir).await {
            return Err(NodeOutcome::error(format!(
                "failed to create manifest directory {}: {e}",
                self.manifest_dir.display()
            )));
        }
        let file = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(node)))
            .suffix(".yaml")
            .tempfile_in(&self.manifest_dir)
            .map_err(|e| {
                NodeOutcome::error(format!(
                    "failed to create manifest in {}: {e}",
                    self.manifest_dir.display()
                ))
            })?
            .into_temp_path();
        if let Err(e) = tokio::fs::write(&file, manifest).await {
            return Err(NodeOutcome::error(format!(
                "failed to write manifest {}: {e}",
                file.display()
            )));
        }
        Ok((file.to_string_lossy().into_owned(), Some(file)))
    }

    fn identity_of(&self, response: &[u8]) -> Option<ResourceRef> {
        let doc: serde_json::Value = serde_json::from_slice(response).ok()?;
        let mut resource = ResourceRef::from_document(&doc)?;
        if resource.namespace.is_none() {
            resource.namespace = self.default_namespace.clone();
        }
        Some(resource)
    }

    async fn invoke_with_retry(
        &self,
        node: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> CallResult {
        let mut attempt = 1u32;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return CallResult::Done(NodeOutcome::cancelled()),
                result = self.client.invoke(args) => result,
            };

            match result {
                Ok(bytes) => return CallResult::Ok(bytes),
                Err(ResourceApiError::Permanent(msg)) => {
                    tracing::warn!(node, error = %msg, "resource action rejected");
                    return CallResult::Done(NodeOutcome::failed(msg));
                }
                Err(e @ ResourceApiError::Transient(_)) => {
                    if !RetryHandler::should_retry(&self.retry, attempt) {
                        return CallResult::Done(NodeOutcome::error(format!(
                            "resource action failed after {attempt} attempts: {e}"
                        )));
                    }
                    let delay = RetryHandler::delay_for(&self.retry, attempt);
                    tracing::warn!(
                        node,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient error invoking resource action, retrying"
                    );
                    if !RetryHandler::sleep(delay, cancel).await {
                        return CallResult::Done(NodeOutcome::cancelled());
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn poll_until_done(
        &self,
        node: &str,
        resource: &ResourceRef,
        request: &ResourceActionRequest,
        cancel: &CancellationToken,
    ) -> NodeOutcome {
        let deadline = Instant::now() + self.poll.timeout();
        let mut polls = 0u32;
        let mut transient_failures = 0u32;

        loop {
            polls += 1;
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return NodeOutcome::cancelled(),
                fetched = tokio::time::timeout_at(deadline, self.client.fetch_state(resource)) => fetched,
            };
            let Ok(fetched) = fetched else {
                return self.timed_out(resource);
            };

            let transient = match fetched {
                Ok(document) => match match_conditions(&document, &request.success, &request.failure) {
                    Ok(ConditionOutcome::Succeeded) => {
                        tracing::info!(node, %resource, polls, "success condition matched");
                        return NodeOutcome::succeeded();
                    }
                    Ok(ConditionOutcome::Failed { reason }) => {
                        tracing::info!(node, %resource, polls, %reason, "failure condition matched");
                        return NodeOutcome::failed(reason);
                    }
                    Ok(ConditionOutcome::Inconclusive) => {
                        tracing::debug!(node, %resource, polls, "conditions not yet met");
                        transient_failures = 0;
                        None
                    }
                    Err(e) => Some(e.to_string()),
                },
                Err(ResourceApiError::Permanent(msg)) => {
                    tracing::warn!(node, %resource, error = %msg, "resource state fetch rejected");
                    return NodeOutcome::failed(msg);
                }
                Err(e @ ResourceApiError::Transient(_)) => Some(e.to_string()),
            };

            let delay = match transient {
                None => self.poll.poll_interval(),
                Some(error) => {
                    transient_failures += 1;
                    if !RetryHandler::should_retry(&self.retry, transient_failures) {
                        return NodeOutcome::error(format!(
                            "polling {resource} failed after {transient_failures} attempts: {error}"
                        ));
                    }
                    tracing::warn!(
                        node,
                        %resource,
                        attempt = transient_failures,
                        %error,
                        "transient error polling resource state, retrying"
                    );
                    RetryHandler::delay_for(&self.retry, transient_failures)
                }
            };

            let wake = (Instant::now() + delay).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return NodeOutcome::cancelled(),
                _ = tokio::time::sleep_until(wake) => {}
            }
            if Instant::now() >= deadline {
                return self.timed_out(resource);
            }
        }
    }

    fn timed_out(&self, resource: &ResourceRef) -> NodeOutcome {
        NodeOutcome::error(format!(
            "timed out after {}s waiting for {resource} to meet its conditions",
            self.poll.timeout_secs
        ))
    }
}

/// File-name-safe form of a node name.
fn sanitize(node: &str) -> String {
    node.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use treadle_types::config::BackoffStrategy;
    use treadle_types::node::NodePhase;

    const CREATED: &str =
        r#"{"kind":"Job","metadata":{"name":"demo","namespace":"ci"},"status":{}}"#;

    fn state(phase: &str) -> Result<Vec<u8>, ResourceApiError> {
        Ok(format!(r#"{{"kind":"Job","status":{{"phase":"{phase}"}}}}"#).into_bytes())
    }

    /// Scripted client: pops one canned response per call.
    #[derive(Default)]
    struct ScriptedClient {
        invokes: Mutex<VecDeque<Result<Vec<u8>, ResourceApiError>>>,
        fetches: Mutex<VecDeque<Result<Vec<u8>, ResourceApiError>>>,
        invoked_with: Mutex<Vec<Vec<String>>>,
        /// Content of the `-f` file as seen while the invoke was in flight.
        manifests_seen: Mutex<Vec<String>>,
        fetched: Mutex<Vec<ResourceRef>>,
    }

    impl ScriptedClient {
        fn new(
            invokes: Vec<Result<Vec<u8>, ResourceApiError>>,
            fetches: Vec<Result<Vec<u8>, ResourceApiError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                invokes: Mutex::new(invokes.into()),
                fetches: Mutex::new(fetches.into()),
                ..Default::default()
            })
        }

        fn invoke_count(&self) -> usize {
            self.invoked_with.lock().unwrap().len()
        }

        fn fetch_count(&self) -> usize {
            self.fetched.lock().unwrap().len()
        }
    }

    impl ResourceClient for ScriptedClient {
        fn invoke(
            &self,
            args: &[String],
        ) -> impl std::future::Future<Output = Result<Vec<u8>, ResourceApiError>> + Send {
            self.invoked_with.lock().unwrap().push(args.to_vec());
            if let Some(i) = args.iter().position(|a| a == "-f") {
                let content = std::fs::read_to_string(&args[i + 1]).unwrap();
                self.manifests_seen.lock().unwrap().push(content);
            }
            let next = self
                .invokes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CREATED.as_bytes().to_vec()));
            async move { next }
        }

        fn fetch_state(
            &self,
            resource: &ResourceRef,
        ) -> impl std::future::Future<Output = Result<Vec<u8>, ResourceApiError>> + Send {
            self.fetched.lock().unwrap().push(resource.clone());
            let next = self.fetches.lock().unwrap().pop_front();
            async move {
                match next {
                    Some(result) => result,
                    // Script exhausted: behave like a resource that never settles.
                    None => state("Running"),
                }
            }
        }
    }

    fn poll_config() -> ResourcePollConfig {
        ResourcePollConfig {
            poll_interval_ms: 1_000,
            timeout_secs: 10,
        }
    }

    fn retry_config() -> BackoffConfig {
        BackoffConfig {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            strategy: BackoffStrategy::Exponential,
        }
    }

    fn executor(client: Arc<ScriptedClient>, dir: &tempfile::TempDir) -> ResourceActionExecutor<ScriptedClient> {
        ResourceActionExecutor::new(client, poll_config(), retry_config(), dir.path().to_path_buf())
            .unwrap()
    }

    fn request(verb: ResourceVerb) -> ResourceActionRequest {
        ResourceActionRequest {
            verb,
            manifest: Some("apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: demo\n".to_string()),
            manifest_path: None,
            flags: vec![],
            merge_strategy: MergeStrategy::default(),
            success: Selector::parse("status.phase == Succeeded").unwrap(),
            failure: Selector::parse("status.phase == Failed").unwrap(),
        }
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_poll() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(
            vec![],
            vec![state("Pending"), state("Running"), state("Succeeded")],
        );
        let exec = executor(client.clone(), &dir);

        let started = Instant::now();
        let outcome = exec
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::succeeded());
        assert_eq!(client.fetch_count(), 3);
        assert!(started.elapsed() <= poll_config().timeout());
        assert_eq!(
            client.fetched.lock().unwrap()[0],
            ResourceRef {
                kind: "Job".to_string(),
                namespace: Some("ci".to_string()),
                name: "demo".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_condition_ends_failed_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![state("Pending"), state("Failed")]);
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome.phase, NodePhase::Failed);
        let msg = outcome.message.unwrap();
        assert!(msg.contains("status.phase == Failed"), "got: {msg}");
        assert_eq!(client.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_settling_resource_times_out_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![]);
        let started = Instant::now();
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome.phase, NodePhase::Error);
        let msg = outcome.message.unwrap();
        assert!(msg.contains("timed out"), "got: {msg}");
        assert!(started.elapsed() <= poll_config().timeout() + Duration::from_millis(1));
        assert_eq!(client.fetch_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_snapshot_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(
            vec![],
            vec![Ok(b"{\"status\": ".to_vec()), state("Succeeded")],
        );
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Apply), &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::succeeded());
        assert_eq!(client.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_poll_errors_exhaust_budget() {
        let dir = tempfile::tempdir().unwrap();
        let unavailable = || Err(ResourceApiError::Transient("ServiceUnavailable".to_string()));
        let client = ScriptedClient::new(vec![], vec![unavailable(), unavailable(), unavailable()]);
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome.phase, NodePhase::Error);
        assert!(outcome.message.unwrap().contains("after 3 attempts"));
        assert_eq!(client.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_fetch_error_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(
            vec![],
            vec![Err(ResourceApiError::Permanent("jobs.batch \"demo\" not found".to_string()))],
        );
        let outcome = executor(client, &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;
        assert_eq!(outcome, NodeOutcome::failed("jobs.batch \"demo\" not found"));
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_delete_succeeds_without_polling() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![]);
        let outcome = executor(client.clone(), &dir)
            .execute("wf.cleanup", &request(ResourceVerb::Delete), &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::succeeded());
        assert_eq!(client.invoke_count(), 1);
        assert_eq!(client.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_conditions_succeeds_after_invoke() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![Ok(b"not json".to_vec())], vec![]);
        let mut req = request(ResourceVerb::Apply);
        req.success = Selector::default();
        req.failure = Selector::default();

        let outcome = executor(client.clone(), &dir)
            .execute("wf.apply", &req, &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::succeeded());
        assert_eq!(client.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_invoke_error_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(
            vec![Err(ResourceApiError::Permanent("admission webhook denied the request".to_string()))],
            vec![],
        );
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::failed("admission webhook denied the request"));
        assert_eq!(client.invoke_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_invoke_error_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(
            vec![
                Err(ResourceApiError::Transient("connection refused".to_string())),
                Ok(CREATED.as_bytes().to_vec()),
            ],
            vec![state("Succeeded")],
        );
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::succeeded());
        assert_eq!(client.invoke_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_invoke_errors_exhaust_budget() {
        let dir = tempfile::tempdir().unwrap();
        let refused = || Err(ResourceApiError::Transient("connection refused".to_string()));
        let client = ScriptedClient::new(vec![refused(), refused(), refused()], vec![]);
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome.phase, NodePhase::Error);
        assert!(outcome.message.unwrap().contains("connection refused"));
        assert_eq!(client.invoke_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failure_is_error_and_never_invokes() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![]);
        let mut req = request(ResourceVerb::Apply);
        req.manifest = None;

        let outcome = executor(client.clone(), &dir)
            .execute("wf.apply", &req, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            NodeOutcome::error("Must provide at least one of flags or manifest.")
        );
        assert_eq!(client.invoke_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_manifest_is_written_and_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![]);
        executor(client.clone(), &dir)
            .execute("wf[0].create(1:b)", &request(ResourceVerb::Delete), &CancellationToken::new())
            .await;

        let args = client.invoked_with.lock().unwrap()[0].clone();
        assert_eq!(args[0], "delete");
        let path = std::path::Path::new(&args[2]);
        assert_eq!(path.parent(), Some(dir.path()));
        let file_name = path.file_name().unwrap().to_string_lossy();
        assert!(file_name.starts_with("wf-0-.create-1-b--"), "got: {file_name}");
        assert!(file_name.ends_with(".yaml"), "got: {file_name}");
        assert!(client.manifests_seen.lock().unwrap()[0].contains("kind: Job"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_manifest_is_removed_after_invoke() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![state("Succeeded")]);
        let outcome = executor(client.clone(), &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;

        assert_eq!(outcome, NodeOutcome::succeeded());
        assert_eq!(client.manifests_seen.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_node_name_concurrently_keeps_manifests_apart() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![]);
        let exec = executor(client.clone(), &dir);

        let mut first = request(ResourceVerb::Delete);
        first.manifest = Some("kind: ConfigMap\nmetadata:\n  name: first\n".to_string());
        let mut second = request(ResourceVerb::Delete);
        second.manifest = Some("kind: ConfigMap\nmetadata:\n  name: second\n".to_string());

        let token = CancellationToken::new();
        let (a, b) = tokio::join!(
            exec.execute("wf.cleanup", &first, &token),
            exec.execute("wf.cleanup", &second, &token),
        );
        assert_eq!(a, NodeOutcome::succeeded());
        assert_eq!(b, NodeOutcome::succeeded());

        let invoked = client.invoked_with.lock().unwrap().clone();
        assert_ne!(invoked[0][2], invoked[1][2]);
        let mut seen = client.manifests_seen.lock().unwrap().clone();
        seen.sort();
        assert!(seen[0].contains("name: first"), "got: {seen:?}");
        assert!(seen[1].contains("name: second"), "got: {seen:?}");
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let poll = ResourcePollConfig {
            poll_interval_ms: 0,
            timeout_secs: 10,
        };
        let result = ResourceActionExecutor::new(
            ScriptedClient::new(vec![], vec![]),
            poll,
            retry_config(),
            std::env::temp_dir(),
        );
        let err = result.err().unwrap();
        assert!(err.to_string().contains("poll_interval_ms"), "got: {err}");
    }

    #[test]
    fn test_zero_attempt_budget_is_rejected() {
        let retry = BackoffConfig {
            max_attempts: 0,
            ..retry_config()
        };
        let result = ResourceActionExecutor::new(
            ScriptedClient::new(vec![], vec![]),
            poll_config(),
            retry,
            std::env::temp_dir(),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_identity_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![Ok(br#"{"status":{}}"#.to_vec())], vec![]);
        let outcome = executor(client, &dir)
            .execute("wf.create", &request(ResourceVerb::Create), &CancellationToken::new())
            .await;
        assert_eq!(outcome.phase, NodePhase::Error);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_poll_loop() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![], vec![]);
        let exec = executor(client.clone(), &dir);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2_500)).await;
                token.cancel();
            })
        };

        let started = Instant::now();
        let outcome = exec
            .execute("wf.create", &request(ResourceVerb::Create), &token)
            .await;
        canceller.await.unwrap();

        assert_eq!(outcome, NodeOutcome::cancelled());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(client.fetch_count(), 3);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("wf[0].step(1:a b)"), "wf-0-.step-1-a-b-");
    }
}
