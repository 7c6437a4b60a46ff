//! Turns a [`GenerationRequest`] into the single text prompt that remote
//! providers accept.

use adcraft_core::generation::GenerationRequest;

/// Compose the instruction with the optional directives.
///
/// Providers without a dedicated field for a directive get it spelled out
/// in the prompt text. A simplified retry request naturally yields a
/// shorter prompt because the optional fields are already cleared.
pub fn compose(request: &GenerationRequest, include_negative: bool) -> String {
    let mut parts = vec![request.instruction.clone()];

    if let Some(workflow) = &request.workflow {
        if workflow.mode.is_editing() {
            parts.push(format!(
                "Task: {} the provided source image.",
                match workflow.mode {
                    adcraft_core::generation::WorkflowMode::Inpaint => "inpaint",
                    adcraft_core::generation::WorkflowMode::Upscale => "upscale",
                    _ => "edit",
                }
            ));
        }
        if let Some(notes) = &workflow.notes {
            parts.push(format!("Notes: {notes}"));
        }
    }
    if include_negative {
        if let Some(negative) = &request.negative_prompt {
            parts.push(format!("Avoid: {negative}"));
        }
    }
    if let Some(quality) = &request.quality {
        parts.push(format!("Quality: {quality}."));
    }
    if let Some(locale) = &request.locale {
        parts.push(format!("Render any visible text in locale {locale}."));
    }
    if request.watermark {
        parts.push("Leave the bottom-right corner clear for a watermark.".to_string());
    }

    parts.join("\n")
}
