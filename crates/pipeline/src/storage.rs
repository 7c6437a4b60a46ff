//! Asset storage: turns inline media bytes into a storage pointer.
//!
//! URL payloads never pass through here; the provider URL is the pointer.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use adcraft_core::types::JobId;
use async_trait::async_trait;

/// Default root for [`LocalAssetStorage`].
pub const DEFAULT_STORAGE_DIR: &str = "./storage/assets";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid asset format '{0}'")]
    InvalidFormat(String),

    #[error("Failed to write asset to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable blob storage for generated media.
#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Store `bytes` for `job_id` and return the storage pointer recorded
    /// on the asset row.
    async fn store(&self, job_id: JobId, format: &str, bytes: &[u8]) -> Result<String, StorageError>;
}

/// Stores assets on the local filesystem under `{root}/{job_id}/`.
#[derive(Debug, Clone)]
pub struct LocalAssetStorage {
    root: PathBuf,
}

impl LocalAssetStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a storage pointer returned by [`AssetStorage::store`].
    pub fn resolve(&self, pointer: &str) -> PathBuf {
        self.root.join(pointer)
    }
}

/// File extensions are restricted to short ASCII alphanumerics so a format
/// string can never escape the job directory.
fn validate_format(format: &str) -> Result<&str, StorageError> {
    let ok = !format.is_empty()
        && format.len() <= 8
        && format.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(format)
    } else {
        Err(StorageError::InvalidFormat(format.to_string()))
    }
}

#[async_trait]
impl AssetStorage for LocalAssetStorage {
    async fn store(&self, job_id: JobId, format: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let ext = validate_format(format)?;
        let pointer = format!("{job_id}/{}.{ext}", uuid::Uuid::new_v4());
        let path = self.resolve(&pointer);

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(job_id = %job_id, pointer = %pointer, bytes = bytes.len(), "Asset stored");
        Ok(pointer)
    }
}

/// Read image dimensions from the header without decoding pixels.
///
/// Returns `None` for unrecognized or truncated data.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use adcraft_core::generation::{AspectRatio, GenerationRequest, MediaKind};
    use adcraft_providers::synthetic::SyntheticImageGenerator;
    use adcraft_providers::{Generator, MediaPayload};
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn stores_under_job_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalAssetStorage::new(dir.path());
        let job_id = adcraft_core::types::new_job_id();

        let pointer = storage.store(job_id, "png", b"not really a png").await.unwrap();
        assert!(pointer.starts_with(&format!("{job_id}/")));
        assert!(pointer.ends_with(".png"));

        let written = tokio::fs::read(storage.resolve(&pointer)).await.unwrap();
        assert_eq!(written, b"not really a png");

        let second = storage.store(job_id, "png", b"x").await.unwrap();
        assert_ne!(pointer, second);
    }

    #[tokio::test]
    async fn rejects_path_like_formats() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalAssetStorage::new(dir.path());
        let job_id = adcraft_core::types::new_job_id();

        assert_matches!(
            storage.store(job_id, "../png", b"x").await,
            Err(StorageError::InvalidFormat(_))
        );
        assert_matches!(
            storage.store(job_id, "", b"x").await,
            Err(StorageError::InvalidFormat(_))
        );
    }

    #[tokio::test]
    async fn reads_dimensions_from_png_header() {
        let mut req = GenerationRequest::new(MediaKind::Image, "Header check");
        req.aspect_ratio = AspectRatio::parse("4:5").unwrap();
        let media = SyntheticImageGenerator.generate(&req).await.unwrap();
        let MediaPayload::Bytes(bytes) = media.payload else {
            panic!("synthetic generator returns bytes");
        };

        assert_eq!(image_dimensions(&bytes), Some((819, 1024)));
        assert_eq!(image_dimensions(b"garbage"), None);
    }
}
