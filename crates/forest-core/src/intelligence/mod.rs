//! Provider interface for the external generative text service.
//!
//! The service is consumed, not implemented: the core only needs
//! `request_intelligence(kind, request) -> response`, where the response is
//! an opaque JSON value handed to the ingestion parser.
//!
//! ```text
//! IngestionPipeline
//!     |
//!     | request_with_deadline(provider, kind, request, timeout, cancel)
//!     v
//! &dyn IntelligenceProvider --request_intelligence--> serde_json::Value
//!     |
//!     +-- CommandProvider    (external CLI, prompt on stdin)
//!     +-- StaticProvider     (fixed response)
//!     +-- UnavailableProvider
//! ```

pub mod command;
pub mod prompt;
pub mod trait_def;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use command::CommandProvider;
pub use prompt::build_decomposition_prompt;
pub use trait_def::IntelligenceProvider;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// What the caller wants from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Decompose a goal into strategic branches and tasks.
    HtaDecomposition,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HtaDecomposition => "hta_decomposition",
        };
        f.write_str(s)
    }
}

/// Payload sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelligenceRequest {
    pub prompt: String,
}

impl IntelligenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Provider failures. Distinct from a response that arrived but is unusable,
/// which the parser reports as `Unrecognized`.
#[derive(Debug, Error)]
pub enum IntelligenceError {
    #[error("provider {0:?} is unavailable")]
    Unavailable(String),

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("request was cancelled")]
    Cancelled,

    #[error("provider failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Deadline + cancellation wrapper
// ---------------------------------------------------------------------------

/// Call `provider` with a timeout, giving up early if `cancel` fires.
///
/// Dropping the provider's future is the cancellation mechanism, so
/// providers must clean up on drop (e.g. `kill_on_drop` for subprocesses).
pub async fn request_with_deadline(
    provider: &dyn IntelligenceProvider,
    kind: RequestKind,
    request: &IntelligenceRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Value, IntelligenceError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(IntelligenceError::Cancelled),
        result = tokio::time::timeout(timeout, provider.request_intelligence(kind, request)) => {
            result.unwrap_or(Err(IntelligenceError::Timeout(timeout)))
        }
    }
}

// ---------------------------------------------------------------------------
// Trivial providers
// ---------------------------------------------------------------------------

/// Returns the same response for every request.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    response: Value,
}

impl StaticProvider {
    pub fn new(response: Value) -> Self {
        Self { response }
    }
}

#[async_trait]
impl IntelligenceProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn request_intelligence(
        &self,
        _kind: RequestKind,
        _request: &IntelligenceRequest,
    ) -> Result<Value, IntelligenceError> {
        Ok(self.response.clone())
    }
}

/// Stands in when no provider is configured. Every request fails, which
/// sends ingestion straight to the fallback path.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableProvider;

#[async_trait]
impl IntelligenceProvider for UnavailableProvider {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn request_intelligence(
        &self,
        _kind: RequestKind,
        _request: &IntelligenceRequest,
    ) -> Result<Value, IntelligenceError> {
        Err(IntelligenceError::Unavailable(self.name().to_owned()))
    }
}
