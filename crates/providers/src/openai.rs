//! OpenAI Images API client (`gpt-image-1`).
//!
//! Generate mode posts JSON to `/images/generations`. Editing modes upload
//! the inline source image to `/images/edits` as multipart form data.

use adcraft_core::generation::{AspectRatio, GenerationRequest, MediaKind};
use adcraft_core::providers::PROVIDER_OPENAI;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::generator::{GeneratedMedia, Generator, GeneratorError, MediaPayload};
use crate::http::{parse_response, request_error};
use crate::prompt;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-image-1";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI image generator.
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

/// Pick the closest supported canvas for an aspect ratio.
///
/// The images API only accepts square, landscape 3:2 and portrait 2:3.
pub fn size_for(aspect: AspectRatio) -> (&'static str, u32, u32) {
    if aspect.width > aspect.height {
        ("1536x1024", 1536, 1024)
    } else if aspect.width < aspect.height {
        ("1024x1536", 1024, 1536)
    } else {
        ("1024x1024", 1024, 1024)
    }
}

/// Map free-form quality hints onto the API's enum.
fn quality_param(quality: Option<&str>) -> &'static str {
    match quality.map(str::to_ascii_lowercase).as_deref() {
        Some("low" | "draft" | "fast") => "low",
        Some("medium" | "standard") => "medium",
        Some("high" | "hd" | "best") => "high",
        _ => "auto",
    }
}

impl OpenAiImageGenerator {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn generation_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let (size, _, _) = size_for(request.aspect_ratio);
        json!({
            "model": self.model,
            "prompt": prompt::compose(request, true),
            "n": 1,
            "size": size,
            "quality": quality_param(request.quality.as_deref()),
        })
    }

    async fn send_generation(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, GeneratorError> {
        self.client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(api_key)
            .json(&self.generation_body(request))
            .send()
            .await
            .map_err(|e| request_error(PROVIDER_OPENAI, e))
    }

    async fn send_edit(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, GeneratorError> {
        let source = request
            .source_image
            .as_ref()
            .and_then(|s| s.data.as_deref().map(|d| (d, s.mime_type.as_str())))
            .ok_or_else(|| {
                GeneratorError::permanent(
                    PROVIDER_OPENAI,
                    "Image edits require inline source image data",
                )
            })?;

        let (data, mime) = source;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| {
                GeneratorError::permanent(PROVIDER_OPENAI, format!("Invalid source image: {e}"))
            })?;

        let image = reqwest::multipart::Part::bytes(bytes)
            .file_name("source")
            .mime_str(mime)
            .map_err(|e| request_error(PROVIDER_OPENAI, e))?;

        let (size, _, _) = size_for(request.aspect_ratio);
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("prompt", prompt::compose(request, true))
            .text("size", size)
            .part("image", image);

        self.client
            .post(format!("{}/images/edits", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER_OPENAI, e))
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[async_trait]
impl Generator for OpenAiImageGenerator {
    fn name(&self) -> &str {
        PROVIDER_OPENAI
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GeneratorError::missing_credentials(PROVIDER_OPENAI, API_KEY_ENV))?;

        let response = if request.mode().is_editing() {
            self.send_edit(api_key, request).await?
        } else {
            self.send_generation(api_key, request).await?
        };

        let body: ImagesResponse = parse_response(PROVIDER_OPENAI, response).await?;
        let datum = body.data.into_iter().next().ok_or_else(|| {
            GeneratorError::permanent(PROVIDER_OPENAI, "Response contained no image")
        })?;
        let encoded = datum.b64_json.ok_or_else(|| {
            GeneratorError::permanent(PROVIDER_OPENAI, "Response image had no b64_json payload")
        })?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| {
                GeneratorError::permanent(PROVIDER_OPENAI, format!("Invalid base64 image: {e}"))
            })?;

        let (size, width, height) = size_for(request.aspect_ratio);
        Ok(GeneratedMedia {
            kind: MediaKind::Image,
            payload: MediaPayload::Bytes(bytes),
            format: "png".to_string(),
            width: Some(width),
            height: Some(height),
            provider: PROVIDER_OPENAI.to_string(),
            metadata: json!({
                "model": self.model,
                "size": size,
                "revised_prompt": datum.revised_prompt,
            }),
        })
    }
}
