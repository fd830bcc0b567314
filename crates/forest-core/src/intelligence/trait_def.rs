//! The `IntelligenceProvider` trait.
//!
//! Object-safe so the pipeline and CLI can hold `&dyn IntelligenceProvider`
//! or `Box<dyn IntelligenceProvider>` without knowing the backend.

use async_trait::async_trait;
use serde_json::Value;

use super::{IntelligenceError, IntelligenceRequest, RequestKind};

/// Adapter interface for an external generative text service.
#[async_trait]
pub trait IntelligenceProvider: Send + Sync {
    /// Human-readable name for logs (e.g. "command:claude").
    fn name(&self) -> &str;

    /// Send one request and return the raw response.
    ///
    /// The response shape is not validated here; see
    /// [`crate::ingest::parser::parse_response`]. Transport failures must be
    /// reported as [`IntelligenceError`], never as a placeholder value.
    async fn request_intelligence(
        &self,
        kind: RequestKind,
        request: &IntelligenceRequest,
    ) -> Result<Value, IntelligenceError>;
}

// Compile-time assertion: the trait can be used as `dyn IntelligenceProvider`.
const _: () = {
    fn _assert_object_safe(_: &dyn IntelligenceProvider) {}
};
