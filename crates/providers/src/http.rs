//! Shared response handling for the HTTP-backed generators.

use serde::de::DeserializeOwned;

use crate::generator::{classify_message, classify_status, GeneratorError, GeneratorErrorKind};

/// Longest slice of an error body kept in the error message.
const MAX_ERROR_BODY: usize = 512;

/// Convert a transport-level failure into a classified error.
pub(crate) fn request_error(provider: &str, err: reqwest::Error) -> GeneratorError {
    let kind = if err.is_timeout() || err.is_connect() {
        GeneratorErrorKind::Transient
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16())
    } else {
        classify_message(&err.to_string())
    };
    GeneratorError::new(kind, provider, format!("HTTP request failed: {err}"))
}

/// Ensure the response has a success status code. On failure the status
/// decides the error kind and the (truncated) body becomes the message.
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GeneratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();

    Err(GeneratorError::new(
        classify_status(status.as_u16()),
        provider,
        format!("API error ({}): {body}", status.as_u16()),
    ))
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, GeneratorError> {
    let response = ensure_success(provider, response).await?;
    response.json::<T>().await.map_err(|e| {
        GeneratorError::permanent(provider, format!("Malformed response body: {e}"))
    })
}
