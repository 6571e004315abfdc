//! BoxModelProvider -- object-safe dynamic dispatch wrapper for
//! `ModelProvider`.
//!
//! 1. Define an object-safe `ModelProviderDyn` trait with boxed futures
//! 2. Blanket-impl `ModelProviderDyn` for all `T: ModelProvider`
//! 3. `BoxModelProvider` wraps `Box<dyn ModelProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use tollgate_types::error::ProviderError;
use tollgate_types::request::{InvokeRequest, InvokeResponse};

use super::provider::ModelProvider;

/// Object-safe version of [`ModelProvider`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation is
/// provided for all types implementing `ModelProvider`.
pub trait ModelProviderDyn: Send + Sync {
    fn id(&self) -> &str;

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a InvokeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InvokeResponse, ProviderError>> + Send + 'a>>;
}

impl<T: ModelProvider> ModelProviderDyn for T {
    fn id(&self) -> &str {
        ModelProvider::id(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        request: &'a InvokeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InvokeResponse, ProviderError>> + Send + 'a>> {
        Box::pin(self.invoke(request))
    }
}

/// Type-erased model provider for runtime selection.
///
/// Since `ModelProvider` uses RPITIT, it cannot be a trait object directly;
/// this wrapper provides equivalent methods that delegate to the inner
/// `ModelProviderDyn` trait object.
pub struct BoxModelProvider {
    inner: Box<dyn ModelProviderDyn + Send + Sync>,
}

impl BoxModelProvider {
    /// Wrap a concrete `ModelProvider` in a type-erased box.
    pub fn new<T: ModelProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, ProviderError> {
        self.inner.invoke_boxed(request).await
    }
}
