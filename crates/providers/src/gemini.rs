//! Google Gemini image generation via the Generative Language API.
//!
//! Sends a `generateContent` request asking for the `IMAGE` modality and
//! returns the first inline image part.

use adcraft_core::generation::{GenerationRequest, MediaKind};
use adcraft_core::providers::PROVIDER_GEMINI;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::generator::{format_from_mime, GeneratedMedia, Generator, GeneratorError, MediaPayload};
use crate::http::{parse_response, request_error};
use crate::prompt;

/// Default Generative Language API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default image model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Gemini image generator.
pub struct GeminiImageGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiImageGenerator {
    /// Create a generator. A `None` key is allowed: every call then fails
    /// with a credential error so the fallback chain takes over.
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the API base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_body(request: &GenerationRequest) -> serde_json::Value {
        let mut parts = vec![json!({ "text": prompt::compose(request, true) })];

        if let Some(source) = &request.source_image {
            if let Some(data) = &source.data {
                parts.push(json!({
                    "inline_data": { "mime_type": source.mime_type, "data": data }
                }));
            } else if let Some(url) = &source.url {
                parts.push(json!({
                    "file_data": { "mime_type": source.mime_type, "file_uri": url }
                }));
            }
        }

        let mut generation_config = json!({
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": request.aspect_ratio.to_string() },
        });
        if let Some(seed) = request.seed {
            generation_config["seed"] = json!(seed);
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[async_trait]
impl Generator for GeminiImageGenerator {
    fn name(&self) -> &str {
        PROVIDER_GEMINI
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GeneratorError::missing_credentials(PROVIDER_GEMINI, API_KEY_ENV))?;

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| request_error(PROVIDER_GEMINI, e))?;

        let body: GenerateContentResponse = parse_response(PROVIDER_GEMINI, response).await?;

        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GeneratorError::permanent(
                PROVIDER_GEMINI,
                format!("Prompt blocked: {reason}"),
            ));
        }

        let finish_reason = body
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone());

        let inline = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .ok_or_else(|| {
                GeneratorError::permanent(
                    PROVIDER_GEMINI,
                    format!(
                        "Response contained no image (finish reason: {})",
                        finish_reason.as_deref().unwrap_or("unknown")
                    ),
                )
            })?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| {
                GeneratorError::permanent(PROVIDER_GEMINI, format!("Invalid base64 image: {e}"))
            })?;

        Ok(GeneratedMedia {
            kind: MediaKind::Image,
            payload: MediaPayload::Bytes(bytes),
            format: format_from_mime(&inline.mime_type),
            width: None,
            height: None,
            provider: PROVIDER_GEMINI.to_string(),
            metadata: json!({
                "model": self.model,
                "mime_type": inline.mime_type,
                "aspect_ratio": request.aspect_ratio.to_string(),
            }),
        })
    }
}
