//! Client side of the external image-generation service.
//!
//! [`GenerationService`] is the seam the node runtime calls through;
//! [`GenerationApi`] implements it against the HTTP generation proxy.

pub mod api;
pub mod error;
pub mod service;

pub use api::{GenerationApi, GenerationApiConfig};
pub use error::GenerationError;
pub use service::{GeneratedImage, GenerationRequest, GenerationService, ReferenceImage};
