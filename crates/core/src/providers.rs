//! Provider identifiers.
//!
//! These strings are stored verbatim in `jobs.provider` and used as keys in
//! the provider registry, so they must never change once jobs reference them.

use crate::generation::MediaKind;

/// Google Gemini image generation.
pub const PROVIDER_GEMINI: &str = "gemini";
/// OpenAI Images API.
pub const PROVIDER_OPENAI: &str = "openai";
/// Google Veo video generation (via the Gemini API).
pub const PROVIDER_VEO: &str = "veo";
/// Offline deterministic image generator. Never fails.
pub const PROVIDER_SYNTHETIC: &str = "synthetic";
/// Offline deterministic video generator. Never fails.
pub const PROVIDER_SYNTHETIC_VIDEO: &str = "synthetic-video";

/// Every provider the platform knows about, paired with the media kind it
/// produces.
pub const KNOWN_PROVIDERS: &[(&str, MediaKind)] = &[
    (PROVIDER_GEMINI, MediaKind::Image),
    (PROVIDER_OPENAI, MediaKind::Image),
    (PROVIDER_SYNTHETIC, MediaKind::Image),
    (PROVIDER_VEO, MediaKind::Video),
    (PROVIDER_SYNTHETIC_VIDEO, MediaKind::Video),
];

/// Media kind produced by a known provider, or `None` for unknown names.
pub fn provider_kind(name: &str) -> Option<MediaKind> {
    KNOWN_PROVIDERS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, kind)| *kind)
}

/// Default fallback chain: each remote provider degrades to the next link,
/// ending at a synthetic generator.
pub const DEFAULT_FALLBACKS: &str = "gemini:openai,openai:synthetic,veo:synthetic-video";
