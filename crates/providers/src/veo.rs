//! Google Veo video generation.
//!
//! Veo runs as a long-running operation: `predictLongRunning` returns an
//! operation name which is polled until `done`. The finished video stays
//! hosted by Google and is returned as a URL payload.

use std::time::Duration;

use adcraft_core::generation::{AspectRatio, GenerationRequest, MediaKind};
use adcraft_core::providers::PROVIDER_VEO;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::generator::{
    classify_message, GeneratedMedia, Generator, GeneratorError, GeneratorErrorKind, MediaPayload,
};
use crate::http::{parse_response, request_error};
use crate::prompt;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "veo-3.0-generate-001";

/// Veo shares the Gemini API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on polls before the operation is considered stuck.
const DEFAULT_MAX_POLLS: u32 = 120;

/// Headroom over the polling budget for submitting the operation and
/// reading its final state.
const REQUEST_HEADROOM: Duration = Duration::from_secs(30);

/// Veo video generator.
pub struct VeoVideoGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    poll_interval: Duration,
    max_polls: u32,
}

/// Veo only renders landscape or portrait.
pub fn veo_aspect_ratio(aspect: AspectRatio) -> &'static str {
    if aspect.height > aspect.width {
        "9:16"
    } else {
        "16:9"
    }
}

/// Map a `google.rpc.Code` to an error kind.
fn classify_rpc_code(code: i32, message: &str) -> GeneratorErrorKind {
    match code {
        // UNAUTHENTICATED, PERMISSION_DENIED
        16 | 7 => GeneratorErrorKind::Unauthorized,
        // DEADLINE_EXCEEDED, RESOURCE_EXHAUSTED, ABORTED, INTERNAL, UNAVAILABLE
        4 | 8 | 10 | 13 | 14 => GeneratorErrorKind::Transient,
        // UNKNOWN carries no structure; fall back to the message.
        2 => classify_message(message),
        _ => GeneratorErrorKind::Permanent,
    }
}

impl VeoVideoGenerator {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn build_body(request: &GenerationRequest) -> serde_json::Value {
        let mut instance = json!({ "prompt": prompt::compose(request, false) });
        if let Some(source) = &request.source_image {
            if let Some(data) = &source.data {
                instance["image"] = json!({
                    "bytesBase64Encoded": data,
                    "mimeType": source.mime_type,
                });
            }
        }

        let mut parameters = json!({
            "aspectRatio": veo_aspect_ratio(request.aspect_ratio),
            "sampleCount": 1,
        });
        if let Some(negative) = &request.negative_prompt {
            parameters["negativePrompt"] = json!(negative);
        }
        if let Some(seed) = request.seed {
            parameters["seed"] = json!(seed);
        }

        json!({ "instances": [instance], "parameters": parameters })
    }

    async fn start(&self, api_key: &str, request: &GenerationRequest) -> Result<String, GeneratorError> {
        let response = self
            .client
            .post(format!(
                "{}/models/{}:predictLongRunning",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", api_key)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| request_error(PROVIDER_VEO, e))?;

        let operation: Operation = parse_response(PROVIDER_VEO, response).await?;
        operation
            .name
            .ok_or_else(|| GeneratorError::permanent(PROVIDER_VEO, "Operation has no name"))
    }

    async fn poll(&self, api_key: &str, name: &str) -> Result<Operation, GeneratorError> {
        for attempt in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(format!("{}/{}", self.base_url, name))
                .header("x-goog-api-key", api_key)
                .send()
                .await
                .map_err(|e| request_error(PROVIDER_VEO, e))?;
            let operation: Operation = parse_response(PROVIDER_VEO, response).await?;

            if operation.done {
                return Ok(operation);
            }
            tracing::debug!(operation = %name, attempt, "Veo operation still running");
        }

        Err(GeneratorError::transient(
            PROVIDER_VEO,
            format!("Operation {name} did not finish after {} polls", self.max_polls),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<RpcStatus>,
    #[serde(default)]
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

impl Operation {
    /// Extract the video URI from a finished operation.
    fn into_video_uri(self) -> Result<String, GeneratorError> {
        if let Some(status) = self.error {
            return Err(GeneratorError::new(
                classify_rpc_code(status.code, &status.message),
                PROVIDER_VEO,
                format!("Operation failed ({}): {}", status.code, status.message),
            ));
        }

        self.response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| v.uri)
            .ok_or_else(|| GeneratorError::permanent(PROVIDER_VEO, "Operation returned no video"))
    }
}

#[async_trait]
impl Generator for VeoVideoGenerator {
    fn name(&self) -> &str {
        PROVIDER_VEO
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn call_timeout(&self) -> Option<Duration> {
        Some(self.poll_interval * self.max_polls + REQUEST_HEADROOM)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GeneratorError::missing_credentials(PROVIDER_VEO, API_KEY_ENV))?;

        let operation_name = self.start(api_key, request).await?;
        tracing::info!(operation = %operation_name, "Veo operation started");

        let uri = self.poll(api_key, &operation_name).await?.into_video_uri()?;

        Ok(GeneratedMedia {
            kind: MediaKind::Video,
            payload: MediaPayload::Url(uri),
            format: "mp4".to_string(),
            width: None,
            height: None,
            provider: PROVIDER_VEO.to_string(),
            metadata: json!({
                "model": self.model,
                "operation": operation_name,
                "aspect_ratio": veo_aspect_ratio(request.aspect_ratio),
            }),
        })
    }
}
