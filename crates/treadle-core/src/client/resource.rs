//! Resource API capability: invoke an action and fetch object state.

use treadle_types::resource::ResourceRef;

/// Classified failure from the resource API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceApiError {
    /// Network trouble or a server-side 5xx-equivalent; worth retrying.
    #[error("transient resource API error: {0}")]
    Transient(String),

    /// Validation failure or a 4xx-equivalent rejection; retrying will not help.
    #[error("{0}")]
    Permanent(String),
}

impl ResourceApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResourceApiError::Transient(_))
    }
}

/// Access to the cluster resource API.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ResourceClient: Send + Sync {
    /// Run one action. `args` is the output of `build_arguments`; the
    /// returned bytes are the raw response document.
    fn invoke(
        &self,
        args: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ResourceApiError>> + Send;

    /// Fetch the current state document of `resource`.
    fn fetch_state(
        &self,
        resource: &ResourceRef,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ResourceApiError>> + Send;
}
