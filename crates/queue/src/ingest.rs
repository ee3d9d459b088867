//! Ingestion gate: validates a submitted batch before it reaches the store.

use crate::item::current_timestamp_ms;
use crate::store::{BatchId, QueueStore};
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

/// Default cap on images per batch.
pub const MAX_BATCH_SIZE: usize = 10;

/// Reasons a whole submission is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// Nothing in the submission declared an image media type.
    #[error("Please upload valid image files")]
    NoValidImages,

    /// More images than the cap; nothing is accepted.
    #[error("Maximum {max} images allowed")]
    TooManyImages { count: usize, max: usize },
}

/// A file as handed over by the acquisition layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub name: String,
    /// Declared media type, e.g. `image/png`.
    pub media_type: String,
    pub bytes: Bytes,
}

impl RawFile {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its media type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self::new(name, media_type, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Filter by media type and enforce the batch cap, all or nothing.
pub fn filter_images(files: Vec<RawFile>, max: usize) -> Result<Vec<RawFile>, IngestError> {
    let images: Vec<RawFile> = files.into_iter().filter(RawFile::is_image).collect();

    if images.is_empty() {
        return Err(IngestError::NoValidImages);
    }

    if images.len() > max {
        return Err(IngestError::TooManyImages {
            count: images.len(),
            max,
        });
    }

    Ok(images)
}

/// Validates submissions and loads accepted batches into a [`QueueStore`].
#[derive(Debug, Clone)]
pub struct IngestionGate {
    max_batch_size: usize,
}

impl Default for IngestionGate {
    fn default() -> Self {
        Self::new(MAX_BATCH_SIZE)
    }
}

impl IngestionGate {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Validate `files` and, on success, replace the store's batch.
    ///
    /// The banner is cleared first; a rejection puts its message on the banner
    /// and leaves the current batch untouched.
    pub async fn submit(
        &self,
        store: &QueueStore,
        files: Vec<RawFile>,
    ) -> Result<BatchId, IngestError> {
        store.set_banner(None).await;

        let submitted = files.len();
        let images = match filter_images(files, self.max_batch_size) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(submitted, "submission rejected: {}", e);
                store.set_banner(Some(e.to_string())).await;
                return Err(e);
            }
        };

        let accepted = images.len();
        let batch_id = store.replace_batch(images, current_timestamp_ms()).await;
        tracing::info!(%batch_id, submitted, accepted, "batch accepted");
        Ok(batch_id)
    }
}
