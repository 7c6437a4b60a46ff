//! Offline generators that never fail.
//!
//! They terminate every fallback chain: output is a pure function of the
//! request (SHA-256 of instruction, aspect ratio and seed), so two runs of
//! the same job produce byte-identical media.

use std::io::Cursor;

use adcraft_core::generation::{GenerationRequest, MediaKind};
use adcraft_core::providers::{PROVIDER_SYNTHETIC, PROVIDER_SYNTHETIC_VIDEO};
use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::png::PngEncoder;
use image::{Delay, ExtendedColorType, Frame, ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::generator::{GeneratedMedia, Generator, GeneratorError, MediaPayload};

/// Long edge of synthetic images, in pixels.
pub const IMAGE_LONG_EDGE: u32 = 1024;

/// Long edge of synthetic video frames. Kept small: GIF quantization is slow.
pub const VIDEO_LONG_EDGE: u32 = 256;

pub const VIDEO_FRAMES: u32 = 12;

const FRAME_DELAY_MS: u32 = 100;

fn request_digest(request: &GenerationRequest) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(request.instruction.as_bytes());
    hasher.update(request.aspect_ratio.to_string().as_bytes());
    if let Some(seed) = request.seed {
        hasher.update(seed.to_le_bytes());
    }
    hasher.finalize().into()
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Linear blend between two colour channels, `t` in `0..=255`.
fn mix(a: u8, b: u8, t: u32) -> u8 {
    ((a as u32 * (255 - t) + b as u32 * t) / 255) as u8
}

/// Diagonal two-colour gradient with digest-derived stripes.
fn gradient_pixel(digest: &[u8; 32], x: u32, y: u32, width: u32, height: u32, phase: u32) -> [u8; 3] {
    let t = ((x * 255 / width.max(1)) + (y * 255 / height.max(1))) / 2;
    let stripe_width = 16 + (digest[6] as u32 % 48);
    let stripe = ((x + y + phase) / stripe_width) % 2 == 0;
    let boost = if stripe { 0 } else { 24 };
    [
        mix(digest[0], digest[3], t).saturating_add(boost),
        mix(digest[1], digest[4], t).saturating_add(boost),
        mix(digest[2], digest[5], t).saturating_add(boost),
    ]
}

fn render_png(digest: [u8; 32], width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let canvas = RgbImage::from_fn(width, height, |x, y| {
        Rgb(gradient_pixel(&digest, x, y, width, height, 0))
    });

    let mut bytes = Vec::new();
    PngEncoder::new(Cursor::new(&mut bytes)).write_image(
        canvas.as_raw(),
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

fn render_gif(digest: [u8; 32], width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let step = 16 + digest[7] as u32 % 16;
    let frames = (0..VIDEO_FRAMES).map(|i| {
        let canvas = RgbaImage::from_fn(width, height, |x, y| {
            let [r, g, b] = gradient_pixel(&digest, x, y, width, height, i * step);
            Rgba([r, g, b, 255])
        });
        Frame::from_parts(canvas, 0, 0, Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1))
    });

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, 30);
        encoder.set_repeat(Repeat::Infinite)?;
        encoder.encode_frames(frames)?;
    }
    Ok(bytes)
}

/// Run a CPU-bound render off the async executor.
async fn render<F>(provider: &str, job: F) -> Result<Vec<u8>, GeneratorError>
where
    F: FnOnce() -> Result<Vec<u8>, image::ImageError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| GeneratorError::permanent(provider, format!("Render task failed: {e}")))?
        .map_err(|e| GeneratorError::permanent(provider, format!("Encoding failed: {e}")))
}

/// Deterministic PNG generator.
#[derive(Debug, Default)]
pub struct SyntheticImageGenerator;

#[async_trait]
impl Generator for SyntheticImageGenerator {
    fn name(&self) -> &str {
        PROVIDER_SYNTHETIC
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let digest = request_digest(request);
        let (width, height) = request.aspect_ratio.dimensions(IMAGE_LONG_EDGE);
        let bytes = render(PROVIDER_SYNTHETIC, move || render_png(digest, width, height)).await?;

        Ok(GeneratedMedia {
            kind: MediaKind::Image,
            payload: MediaPayload::Bytes(bytes),
            format: "png".to_string(),
            width: Some(width),
            height: Some(height),
            provider: PROVIDER_SYNTHETIC.to_string(),
            metadata: json!({ "digest": hex(&digest), "synthetic": true }),
        })
    }
}

/// Deterministic looping GIF generator standing in for video providers.
#[derive(Debug, Default)]
pub struct SyntheticVideoGenerator;

#[async_trait]
impl Generator for SyntheticVideoGenerator {
    fn name(&self) -> &str {
        PROVIDER_SYNTHETIC_VIDEO
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let digest = request_digest(request);
        let (width, height) = request.aspect_ratio.dimensions(VIDEO_LONG_EDGE);
        let bytes =
            render(PROVIDER_SYNTHETIC_VIDEO, move || render_gif(digest, width, height)).await?;

        Ok(GeneratedMedia {
            kind: MediaKind::Video,
            payload: MediaPayload::Bytes(bytes),
            format: "gif".to_string(),
            width: Some(width),
            height: Some(height),
            provider: PROVIDER_SYNTHETIC_VIDEO.to_string(),
            metadata: json!({
                "digest": hex(&digest),
                "synthetic": true,
                "frames": VIDEO_FRAMES,
                "frame_delay_ms": FRAME_DELAY_MS,
            }),
        })
    }
}
