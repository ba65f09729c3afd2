//! Detached node work.
//!
//! A [`Job`] is everything one firing needs, captured from the graph when
//! the node is triggered, so that executing it borrows nothing from the
//! board hierarchy. Only [`execute`] suspends.

use std::sync::Arc;

use atelier_core::matte::{self, PNG_MIME};
use atelier_core::node::{ImageRef, MattingMode};
use atelier_core::types::{BoardId, NodeId};
use atelier_generation::{GeneratedImage, GenerationRequest, GenerationService};

use crate::error::RuntimeError;

/// Instruction for the first accurate-path render.
pub const WHITE_BACKGROUND_PROMPT: &str = "Place this exact subject on a pure solid white \
background (#FFFFFF). Keep the subject, its colors, pose and framing identical. \
No shadows, no gradients, no other objects.";

/// Instruction for the second accurate-path render, applied to the first.
pub const BLACK_BACKGROUND_PROMPT: &str = "Replace the white background with a pure solid \
black background (#000000). Change nothing else.";

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    /// One generation call for a generator node.
    Generate(GenerationRequest),
    /// Background removal for a post-process node.
    Matte {
        source: Arc<[u8]>,
        source_mime: String,
        mode: MattingMode,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub board_id: BoardId,
    pub node_id: NodeId,
    pub kind: JobKind,
}

/// Encoded image produced by a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl JobOutput {
    pub fn to_image_ref(&self) -> ImageRef {
        ImageRef::from_bytes(self.bytes.clone(), self.mime_type.clone())
    }
}

impl From<GeneratedImage> for JobOutput {
    fn from(image: GeneratedImage) -> Self {
        Self {
            bytes: image.bytes,
            mime_type: image.mime_type,
        }
    }
}

/// Run a job to completion.
pub async fn execute(
    job: &Job,
    generation: Option<&dyn GenerationService>,
) -> Result<JobOutput, RuntimeError> {
    match &job.kind {
        JobKind::Generate(request) => {
            let service = require_service(generation)?;
            Ok(service.generate(request).await?.into())
        }
        JobKind::Matte {
            source,
            mode: MattingMode::Threshold,
            ..
        } => {
            let source = source.clone();
            let bytes = tokio::task::spawn_blocking(move || matte::threshold_encoded(&source)).await??;
            Ok(png(bytes))
        }
        JobKind::Matte {
            source,
            source_mime,
            mode: MattingMode::Difference,
        } => {
            let service = require_service(generation)?;
            let white = service
                .generate(
                    &GenerationRequest::new(WHITE_BACKGROUND_PROMPT)
                        .with_reference(source.clone(), source_mime.clone()),
                )
                .await?;
            tracing::debug!(node_id = %job.node_id, "White render received");
            let black = service
                .generate(
                    &GenerationRequest::new(BLACK_BACKGROUND_PROMPT)
                        .with_reference(white.bytes.clone(), white.mime_type.clone()),
                )
                .await?;
            tracing::debug!(node_id = %job.node_id, "Black render received");

            let bytes = tokio::task::spawn_blocking(move || {
                matte::matte_encoded(&white.bytes, &black.bytes)
            })
            .await??;
            Ok(png(bytes))
        }
    }
}

fn require_service(
    generation: Option<&dyn GenerationService>,
) -> Result<&dyn GenerationService, RuntimeError> {
    generation.ok_or_else(|| {
        RuntimeError::Core(atelier_core::error::CoreError::GenerationFailed(
            "No generation service configured".to_string(),
        ))
    })
}

fn png(bytes: Vec<u8>) -> JobOutput {
    JobOutput {
        bytes: bytes.into(),
        mime_type: PNG_MIME.to_string(),
    }
}
