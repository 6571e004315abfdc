//! ModelProvider trait definition.
//!
//! Providers are modeled as an abstract capability behind a uniform
//! interface; no particular LLM API wire format is assumed. Capability
//! flags (vision, privacy) live on `ProviderConfig`, not here, so a
//! provider implementation only has to answer calls.

use std::future::Future;

use tollgate_types::error::ProviderError;
use tollgate_types::request::{InvokeRequest, InvokeResponse};

/// Trait for backend model providers.
///
/// Uses native async fn in traits (RPITIT) with explicit `Send` bounds.
/// Concrete implementations live outside this crate; tests use in-process
/// mocks.
pub trait ModelProvider: Send + Sync {
    /// Unique provider id, matching `ProviderConfig.id`.
    fn id(&self) -> &str;

    /// Execute one request. The executor bounds this with a per-tier
    /// timeout; implementations need not enforce their own.
    fn invoke(
        &self,
        request: &InvokeRequest,
    ) -> impl Future<Output = Result<InvokeResponse, ProviderError>> + Send;
}
