//! Retry-then-fallback policy for a single generation unit.
//!
//! [`FallbackGenerator`] wraps a primary generator and an optional next
//! link. Because it implements [`Generator`] itself, a chain such as
//! `gemini → openai → synthetic` is a linked list of wrappers.
//!
//! Policy:
//! - success returns immediately
//! - a transient failure is retried once with [`GenerationRequest::simplified`]
//! - a credential failure, or a retry that failed transiently or with
//!   credentials, hands the whole unit to the fallback
//! - permanent failures propagate untouched

use std::sync::Arc;
use std::time::Duration;

use adcraft_core::generation::{GenerationRequest, MediaKind};
use adcraft_providers::{GeneratedMedia, Generator, GeneratorError};
use async_trait::async_trait;

/// Default bound on a single provider call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One link of a provider chain.
pub struct FallbackGenerator {
    primary: Arc<dyn Generator>,
    fallback: Option<Arc<dyn Generator>>,
    timeout: Duration,
}

impl FallbackGenerator {
    /// `timeout` bounds each primary call. A primary that declares a
    /// longer [`Generator::call_timeout`] gets its own bound instead.
    pub fn new(primary: Arc<dyn Generator>, timeout: Duration) -> Self {
        let timeout = primary
            .call_timeout()
            .map_or(timeout, |own| own.max(timeout));
        Self {
            primary,
            fallback: None,
            timeout,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Generator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Bound applied to each primary call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name of the next link, if any.
    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_deref().map(|f| f.name())
    }

    /// Invoke the primary once, converting an elapsed timeout into a
    /// transient failure.
    async fn call_primary(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        match tokio::time::timeout(self.timeout, self.primary.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::transient(
                self.primary.name(),
                format!("Call timed out after {}s", self.timeout.as_secs_f32()),
            )),
        }
    }

    /// Run the primary with the single simplified retry. `Err` carries the
    /// error that should be considered for fallback; permanent errors are
    /// returned through the outer `Err` unchanged.
    async fn attempt_primary(
        &self,
        request: &GenerationRequest,
    ) -> Result<Result<GeneratedMedia, GeneratorError>, GeneratorError> {
        let provider = self.primary.name();

        let first = match self.call_primary(request).await {
            Ok(media) => return Ok(Ok(media)),
            Err(e) => e,
        };

        if first.is_credential() {
            tracing::warn!(provider, error = %first, "Credential failure, skipping retry");
            return Ok(Err(first));
        }
        if !first.is_transient() {
            return Err(first);
        }

        tracing::warn!(provider, error = %first, "Transient failure, retrying with simplified request");

        match self.call_primary(&request.simplified()).await {
            Ok(media) => {
                tracing::info!(provider, "Simplified retry succeeded");
                Ok(Ok(media))
            }
            Err(retry) if retry.is_transient() || retry.is_credential() => Ok(Err(retry)),
            Err(retry) => Err(retry),
        }
    }
}

#[async_trait]
impl Generator for FallbackGenerator {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn kind(&self) -> MediaKind {
        self.primary.kind()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let last = match self.attempt_primary(request).await? {
            Ok(media) => return Ok(media),
            Err(e) => e,
        };

        match &self.fallback {
            Some(fallback) => {
                tracing::warn!(
                    provider = self.primary.name(),
                    fallback = fallback.name(),
                    error = %last,
                    "Delegating generation to fallback provider",
                );
                fallback.generate(request).await
            }
            None => Err(last),
        }
    }
}
