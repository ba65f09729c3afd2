//! The generation collaborator contract.

use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::prompt::GenerationOptions;

use crate::error::GenerationError;

/// Encoded image passed to the service as visual guidance.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

/// One generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub reference_images: Vec<ReferenceImage>,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, bytes: Arc<[u8]>, mime_type: impl Into<String>) -> Self {
        self.reference_images.push(ReferenceImage {
            bytes,
            mime_type: mime_type.into(),
        });
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Encoded image returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

/// A single idempotent RPC producing one image.
///
/// Implementations must tolerate two calls in sequence where the second
/// call's reference image is the first call's output.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError>;

    /// Whether a credential is configured. Without one, callers fall back
    /// to local-only processing where they can.
    fn has_credential(&self) -> bool;
}
