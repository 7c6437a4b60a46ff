//! The [`Generator`] trait and its structured error taxonomy.

use std::time::Duration;

use adcraft_core::generation::{GenerationRequest, MediaKind};
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Where the generated bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// Hosted by the provider; the URL is stored as the asset pointer.
    Url(String),
    /// Returned inline; must be written to asset storage before persisting.
    Bytes(Vec<u8>),
}

/// One generated asset.
#[derive(Debug, Clone)]
pub struct GeneratedMedia {
    pub kind: MediaKind,
    pub payload: MediaPayload,
    /// File extension without a dot, e.g. `png` or `mp4`.
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Name of the provider that actually produced the media. After a
    /// fallback this differs from the job's requested provider.
    pub provider: String,
    /// Provider-specific details recorded on the asset row.
    pub metadata: serde_json::Value,
}

impl GeneratedMedia {
    /// Payload size in bytes, when known.
    pub fn byte_size(&self) -> Option<usize> {
        match &self.payload {
            MediaPayload::Bytes(bytes) => Some(bytes.len()),
            MediaPayload::Url(_) => None,
        }
    }
}

/// Map a MIME type to the file extension stored in `assets.format`.
pub fn format_from_mime(mime: &str) -> String {
    let ext = match mime.split(';').next().unwrap_or(mime).trim() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpeg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        other => other.rsplit('/').next().unwrap_or("bin"),
    };
    ext.to_string()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// How a failed call should be treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorErrorKind {
    /// No API key configured for this provider.
    MissingCredentials,
    /// The provider rejected our credentials (401/403).
    Unauthorized,
    /// Timeouts, 5xx, rate limiting. Worth one simplified retry.
    Transient,
    /// Validation errors, safety blocks, unsupported parameters.
    Permanent,
}

/// A classified generation failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider}: {message}")]
pub struct GeneratorError {
    pub kind: GeneratorErrorKind,
    pub provider: String,
    pub message: String,
}

impl GeneratorError {
    pub fn new(
        kind: GeneratorErrorKind,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn missing_credentials(provider: &str, env_var: &str) -> Self {
        Self::new(
            GeneratorErrorKind::MissingCredentials,
            provider,
            format!("API key not configured (set {env_var})"),
        )
    }

    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        Self::new(GeneratorErrorKind::Transient, provider, message)
    }

    pub fn permanent(provider: &str, message: impl Into<String>) -> Self {
        Self::new(GeneratorErrorKind::Permanent, provider, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GeneratorErrorKind::Transient
    }

    /// Missing or rejected credentials. Retrying with the same key is
    /// pointless, so these go straight to the fallback.
    pub fn is_credential(&self) -> bool {
        matches!(
            self.kind,
            GeneratorErrorKind::MissingCredentials | GeneratorErrorKind::Unauthorized
        )
    }
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> GeneratorErrorKind {
    match status {
        401 | 403 => GeneratorErrorKind::Unauthorized,
        408 | 429 | 500..=599 => GeneratorErrorKind::Transient,
        _ => GeneratorErrorKind::Permanent,
    }
}

/// Lower-cased substrings that mark a failure as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "internal error",
    "service unavailable",
    "unavailable",
    "overloaded",
    "connection reset",
    "try again",
];

/// Lower-cased substrings that mark a failure as a credential problem.
const CREDENTIAL_MARKERS: &[&str] = &[
    "api key",
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "permission denied",
];

/// Classify an error that carries only prose.
///
/// Only used where a provider gives us nothing structured (transport
/// errors without a status, long-running operations that fail with a bare
/// message). Anything unrecognized is permanent.
pub fn classify_message(message: &str) -> GeneratorErrorKind {
    let lower = message.to_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        GeneratorErrorKind::Unauthorized
    } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        GeneratorErrorKind::Transient
    } else {
        GeneratorErrorKind::Permanent
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A capability that turns one normalized instruction into one media asset.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Registry name, e.g. `gemini`.
    fn name(&self) -> &str;

    /// The media kind this generator produces.
    fn kind(&self) -> MediaKind;

    /// Per-call bound this generator needs when it can legitimately run
    /// longer than the configured default (e.g. polled long-running jobs).
    fn call_timeout(&self) -> Option<Duration> {
        None
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError>;
}
