use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure to refresh state from one of the external collaborators.
///
/// These errors are never fatal once the reconciler is running: the owning
/// loop logs them and keeps the last known state.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("failed to list {kind}: {source}")]
    List {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("failed to list {kind} in namespace {namespace}: {source}")]
    ListNamespaced {
        kind: &'static str,
        namespace: String,
        #[source]
        source: BoxError,
    },

    #[error("threat provider rejected the API key (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("threat provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("threat provider request failed: {0}")]
    Provider(#[source] BoxError),

    #[error("invalid threat provider response: {0}")]
    InvalidResponse(String),
}
