use atelier_core::error::CoreError;

/// Errors from the generation service layer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The service answered 2xx but the payload could not be used.
    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),

    #[error("No generation credential configured")]
    MissingCredential,
}

impl From<GenerationError> for CoreError {
    fn from(e: GenerationError) -> Self {
        CoreError::GenerationFailed(e.to_string())
    }
}
