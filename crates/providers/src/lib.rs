//! Generative-AI provider clients.
//!
//! Every provider implements [`generator::Generator`]: one call turns a
//! normalized [`adcraft_core::generation::GenerationRequest`] into one
//! [`generator::GeneratedMedia`] or a classified [`generator::GeneratorError`].
//! Retry and fallback policy live in `adcraft-pipeline`, not here.

pub mod gemini;
pub mod generator;
mod http;
pub mod openai;
pub mod prompt;
pub mod synthetic;
pub mod veo;

pub use generator::{GeneratedMedia, Generator, GeneratorError, GeneratorErrorKind, MediaPayload};
