//! Asset-library sink contract.
//!
//! The core only ever writes to the asset library; it never reads back.

use std::sync::Arc;

use crate::types::Timestamp;

/// A generated image published to the asset library.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub id: uuid::Uuid,
    pub image_bytes: Arc<[u8]>,
    pub mime_type: String,
    /// Prompt the image was generated from.
    pub source_prompt: String,
    pub timestamp: Timestamp,
}

impl AssetRecord {
    pub fn new(
        image_bytes: Arc<[u8]>,
        mime_type: impl Into<String>,
        source_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            image_bytes,
            mime_type: mime_type.into(),
            source_prompt: source_prompt.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Write-only destination for generated images.
pub trait AssetSink: Send + Sync {
    fn notify_asset_created(&self, asset: AssetRecord);
}
