//! Task types, media kinds and the normalized generation request.
//!
//! A job's prompt payload is opaque JSON as far as the job store is
//! concerned. The dispatcher decodes it into a [`GenerationRequest`] with
//! [`GenerationRequest::from_payload`] right before calling a generator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Task type / media kind
// ---------------------------------------------------------------------------

/// Task type stored in `jobs.task_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "IMAGE_GEN")]
    ImageGen,
    #[serde(rename = "VIDEO_GEN")]
    VideoGen,
}

impl TaskType {
    /// Parse from the database `task_type` column.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "IMAGE_GEN" => Ok(Self::ImageGen),
            "VIDEO_GEN" => Ok(Self::VideoGen),
            other => Err(CoreError::Validation(format!(
                "Unknown task type '{other}'. Must be one of: IMAGE_GEN, VIDEO_GEN"
            ))),
        }
    }

    /// Database name value.
    pub fn name(self) -> &'static str {
        match self {
            Self::ImageGen => "IMAGE_GEN",
            Self::VideoGen => "VIDEO_GEN",
        }
    }

    /// The kind of media this task produces.
    pub fn media_kind(self) -> MediaKind {
        match self {
            Self::ImageGen => MediaKind::Image,
            Self::VideoGen => MediaKind::Video,
        }
    }
}

/// Kind of media a generator produces, stored in `assets.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Aspect ratio
// ---------------------------------------------------------------------------

/// Largest value allowed on either side of an aspect ratio.
const MAX_RATIO_TERM: u32 = 32;

/// Default aspect ratio when a job does not specify one.
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// An aspect ratio such as `16:9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    /// Parse `"W:H"`. Both terms must be in `1..=32`.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        let invalid = || {
            CoreError::Validation(format!(
                "Invalid aspect ratio '{value}'. Expected 'W:H', e.g. '16:9'"
            ))
        };

        let (w, h) = value.trim().split_once(':').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 || width > MAX_RATIO_TERM || height > MAX_RATIO_TERM {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }

    /// Pixel dimensions whose long edge equals `long_edge`.
    pub fn dimensions(self, long_edge: u32) -> (u32, u32) {
        if self.width >= self.height {
            let h = (long_edge as u64 * self.height as u64 / self.width as u64) as u32;
            (long_edge, h.max(1))
        } else {
            let w = (long_edge as u64 * self.width as u64 / self.height as u64) as u32;
            (w.max(1), long_edge)
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Workflow directive
// ---------------------------------------------------------------------------

/// What the generator is asked to do with the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Plain text-to-media generation.
    #[default]
    Generate,
    /// Edit the supplied source image according to the instruction.
    Edit,
    /// Repaint a masked region of the source image.
    Inpaint,
    /// Upscale the source image.
    Upscale,
}

impl WorkflowMode {
    /// Editing modes operate on a source image and must survive a
    /// simplified retry, otherwise the retry would answer a different
    /// question.
    pub fn is_editing(self) -> bool {
        !matches!(self, Self::Generate)
    }
}

/// Workflow mode plus optional free-text notes for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowDirective {
    #[serde(default)]
    pub mode: WorkflowMode,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Reference image supplied with the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    /// Remote location of the image.
    #[serde(default)]
    pub url: Option<String>,
    /// Base64-encoded image bytes.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default = "default_source_mime")]
    pub mime_type: String,
}

fn default_source_mime() -> String {
    "image/png".to_string()
}

// ---------------------------------------------------------------------------
// Prompt payload (wire shape stored in jobs.prompt)
// ---------------------------------------------------------------------------

/// The JSON shape the enqueue collaborator stores in `jobs.prompt`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptPayload {
    #[serde(alias = "prompt")]
    pub instruction: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub watermark: bool,
    #[serde(default)]
    pub workflow: Option<WorkflowDirective>,
    #[serde(default)]
    pub source_image: Option<SourceImage>,
}

// ---------------------------------------------------------------------------
// Generation request
// ---------------------------------------------------------------------------

/// Normalized, provider-agnostic instruction handed to a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: MediaKind,
    pub instruction: String,
    pub negative_prompt: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub quality: Option<String>,
    pub locale: Option<String>,
    pub seed: Option<i64>,
    pub watermark: bool,
    pub workflow: Option<WorkflowDirective>,
    pub source_image: Option<SourceImage>,
}

impl GenerationRequest {
    /// A minimal request carrying only an instruction.
    pub fn new(kind: MediaKind, instruction: impl Into<String>) -> Self {
        Self {
            kind,
            instruction: instruction.into(),
            negative_prompt: None,
            aspect_ratio: AspectRatio::default(),
            quality: None,
            locale: None,
            seed: None,
            watermark: false,
            workflow: None,
            source_image: None,
        }
    }

    /// Decode a job's opaque prompt payload.
    ///
    /// Blank optional strings are normalized to `None` so that providers
    /// never receive empty parameters.
    pub fn from_payload(
        kind: MediaKind,
        aspect_ratio: &str,
        payload: &serde_json::Value,
    ) -> Result<Self, CoreError> {
        let parsed: PromptPayload = serde_json::from_value(payload.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid prompt payload: {e}")))?;

        let instruction = parsed.instruction.trim().to_string();
        if instruction.is_empty() {
            return Err(CoreError::Validation(
                "Prompt payload has an empty instruction".into(),
            ));
        }

        if let Some(source) = &parsed.source_image {
            if source.url.is_none() && source.data.is_none() {
                return Err(CoreError::Validation(
                    "Source image requires either 'url' or 'data'".into(),
                ));
            }
        }

        let workflow = parsed.workflow.map(|w| WorkflowDirective {
            mode: w.mode,
            notes: non_blank(w.notes),
        });

        Ok(Self {
            kind,
            instruction,
            negative_prompt: non_blank(parsed.negative_prompt),
            aspect_ratio: AspectRatio::parse(aspect_ratio)?,
            quality: non_blank(parsed.quality),
            locale: non_blank(parsed.locale),
            seed: parsed.seed,
            watermark: parsed.watermark,
            workflow,
            source_image: parsed.source_image,
        })
    }

    /// The reduced request used for the single retry after a transient
    /// failure.
    ///
    /// Clears the negative prompt, quality, locale and seed. The workflow
    /// directive is dropped entirely unless it names an editing mode, in
    /// which case only its notes are dropped. The instruction, aspect
    /// ratio, watermark directive and source image are kept.
    pub fn simplified(&self) -> Self {
        let workflow = match &self.workflow {
            Some(directive) if directive.mode.is_editing() => Some(WorkflowDirective {
                mode: directive.mode,
                notes: None,
            }),
            _ => None,
        };

        Self {
            negative_prompt: None,
            quality: None,
            locale: None,
            seed: None,
            workflow,
            ..self.clone()
        }
    }

    /// Workflow mode, defaulting to plain generation.
    pub fn mode(&self) -> WorkflowMode {
        self.workflow.as_ref().map(|w| w.mode).unwrap_or_default()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn full_request(mode: WorkflowMode) -> GenerationRequest {
        GenerationRequest {
            kind: MediaKind::Image,
            instruction: "A red sneaker on a beach".into(),
            negative_prompt: Some("blurry".into()),
            aspect_ratio: AspectRatio::parse("16:9").unwrap(),
            quality: Some("hd".into()),
            locale: Some("de-DE".into()),
            seed: Some(42),
            watermark: true,
            workflow: Some(WorkflowDirective {
                mode,
                notes: Some("keep the logo".into()),
            }),
            source_image: None,
        }
    }

    // -- Aspect ratio --

    #[test]
    fn aspect_ratio_parses_common_values() {
        assert_eq!(
            AspectRatio::parse("16:9").unwrap(),
            AspectRatio {
                width: 16,
                height: 9
            }
        );
        assert_eq!(AspectRatio::parse(" 9 : 16 ").unwrap().to_string(), "9:16");
    }

    #[test]
    fn aspect_ratio_rejects_garbage() {
        assert!(AspectRatio::parse("wide").is_err());
        assert!(AspectRatio::parse("0:1").is_err());
        assert!(AspectRatio::parse("64:1").is_err());
        assert!(AspectRatio::parse("16x9").is_err());
    }

    #[test]
    fn aspect_ratio_dimensions_keep_long_edge() {
        let landscape = AspectRatio::parse("16:9").unwrap();
        assert_eq!(landscape.dimensions(1024), (1024, 576));
        let portrait = AspectRatio::parse("9:16").unwrap();
        assert_eq!(portrait.dimensions(1024), (576, 1024));
    }

    // -- Task type --

    #[test]
    fn task_type_names_round_trip() {
        for t in [TaskType::ImageGen, TaskType::VideoGen] {
            assert_eq!(TaskType::from_name(t.name()).unwrap(), t);
        }
        assert_eq!(TaskType::VideoGen.media_kind(), MediaKind::Video);
        assert!(TaskType::from_name("AUDIO_GEN").is_err());
    }

    // -- Payload decoding --

    #[test]
    fn payload_decodes_with_prompt_alias_and_blank_fields() {
        let payload = json!({
            "prompt": "  Summer sale banner ",
            "negative_prompt": "   ",
            "locale": "fr-FR",
            "workflow": { "mode": "edit", "notes": "" },
            "source_image": { "url": "https://cdn.example/shoe.png" }
        });
        let req = GenerationRequest::from_payload(MediaKind::Image, "4:5", &payload).unwrap();
        assert_eq!(req.instruction, "Summer sale banner");
        assert_eq!(req.negative_prompt, None);
        assert_eq!(req.locale.as_deref(), Some("fr-FR"));
        assert_eq!(req.mode(), WorkflowMode::Edit);
        assert_eq!(req.workflow.as_ref().unwrap().notes, None);
        assert_eq!(req.source_image.as_ref().unwrap().mime_type, "image/png");
        assert_eq!(req.aspect_ratio.to_string(), "4:5");
    }

    #[test]
    fn payload_rejects_empty_instruction() {
        let err = GenerationRequest::from_payload(MediaKind::Image, "1:1", &json!({"instruction": " "}))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn payload_rejects_non_object() {
        assert!(GenerationRequest::from_payload(MediaKind::Image, "1:1", &json!("hi")).is_err());
    }

    #[test]
    fn payload_rejects_source_image_without_content() {
        let payload = json!({"instruction": "x", "source_image": {"mime_type": "image/jpeg"}});
        assert!(GenerationRequest::from_payload(MediaKind::Image, "1:1", &payload).is_err());
    }

    // -- Simplification --

    #[test]
    fn simplified_clears_optional_fields_and_default_workflow() {
        let simple = full_request(WorkflowMode::Generate).simplified();
        assert_eq!(simple.negative_prompt, None);
        assert_eq!(simple.quality, None);
        assert_eq!(simple.locale, None);
        assert_eq!(simple.seed, None);
        assert_eq!(simple.workflow, None);
        assert_eq!(simple.instruction, "A red sneaker on a beach");
        assert!(simple.watermark);
        assert_eq!(simple.aspect_ratio.to_string(), "16:9");
    }

    #[test]
    fn simplified_keeps_editing_mode_but_drops_notes() {
        let simple = full_request(WorkflowMode::Inpaint).simplified();
        assert_eq!(
            simple.workflow,
            Some(WorkflowDirective {
                mode: WorkflowMode::Inpaint,
                notes: None
            })
        );
    }
}
