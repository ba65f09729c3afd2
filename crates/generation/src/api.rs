//! HTTP client for the generation proxy.
//!
//! One endpoint, `POST {api_url}/generate`, takes a JSON body carrying the
//! prompt, base64-encoded reference images and optional knobs, and answers
//! with a single base64-encoded image.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::service::{GeneratedImage, GenerationRequest, GenerationService};

/// Default request timeout for one generation call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Header carrying the API credential.
const API_KEY_HEADER: &str = "x-api-key";

/// Connection settings for [`GenerationApi`].
#[derive(Debug, Clone)]
pub struct GenerationApiConfig {
    /// Base HTTP URL, e.g. `http://localhost:8787`.
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl GenerationApiConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    reference_images: Vec<EncodedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncodedImage {
    mime_type: String,
    data: String,
}

/// Response returned by `POST /generate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    /// Base64-encoded image bytes.
    image: String,
    #[serde(default = "default_mime_type")]
    mime_type: String,
}

fn default_mime_type() -> String {
    "image/png".to_string()
}

/// HTTP client for a single generation proxy.
pub struct GenerationApi {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl GenerationApi {
    /// Build a client with its own connection pool and timeout.
    pub fn new(config: GenerationApiConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing [`reqwest::Client`]. The config's timeout is
    /// ignored in favour of the client's.
    pub fn with_client(client: reqwest::Client, config: GenerationApiConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn body<'a>(request: &'a GenerationRequest) -> GenerateBody<'a> {
        GenerateBody {
            prompt: &request.prompt,
            reference_images: request
                .reference_images
                .iter()
                .map(|r| EncodedImage {
                    mime_type: r.mime_type.clone(),
                    data: BASE64.encode(&r.bytes),
                })
                .collect(),
            aspect_ratio: request.options.aspect_ratio.as_deref(),
            resolution: request.options.resolution.as_deref(),
        }
    }

    fn decode(response: GenerateResponse) -> Result<GeneratedImage, GenerationError> {
        let bytes = BASE64
            .decode(response.image.as_bytes())
            .map_err(|e| GenerationError::InvalidResponse(format!("image is not base64: {e}")))?;
        if bytes.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "image is empty".to_string(),
            ));
        }
        Ok(GeneratedImage {
            bytes: bytes.into(),
            mime_type: response.mime_type,
        })
    }

    // ---- private helpers ----

    /// Return the response unchanged on a success status, or an
    /// [`GenerationError::ApiError`] carrying status and body.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GenerationError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GenerationService for GenerationApi {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::MissingCredential)?;

        tracing::debug!(
            prompt_len = request.prompt.len(),
            references = request.reference_images.len(),
            "Submitting generation request"
        );
        let response = self
            .client
            .post(format!("{}/generate", self.api_url))
            .header(API_KEY_HEADER, api_key)
            .json(&Self::body(request))
            .send()
            .await?;

        let image = Self::decode(Self::parse_response(response).await?)?;
        tracing::info!(
            bytes = image.bytes.len(),
            mime_type = %image.mime_type,
            "Generation completed"
        );
        Ok(image)
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use atelier_core::prompt::GenerationOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (url, handle)
    }

    fn api(url: String, key: Option<&str>) -> GenerationApi {
        GenerationApi::new(GenerationApiConfig {
            api_url: url,
            api_key: key.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    // -- Request body -------------------------------------------------------

    #[test]
    fn body_encodes_references_and_options() {
        let request = GenerationRequest::new("a red fox")
            .with_reference(Arc::from(vec![1u8, 2, 3]), "image/png")
            .with_options(GenerationOptions {
                aspect_ratio: Some("16:9".into()),
                resolution: None,
            });
        let json = serde_json::to_value(GenerationApi::body(&request)).unwrap();
        assert_eq!(json["prompt"], "a red fox");
        assert_eq!(json["referenceImages"][0]["data"], "AQID");
        assert_eq!(json["referenceImages"][0]["mimeType"], "image/png");
        assert_eq!(json["aspectRatio"], "16:9");
        assert!(json.get("resolution").is_none());
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let api = api("http://localhost:1".into(), Some("  "));
        assert!(!api.has_credential());
    }

    // -- Round trips --------------------------------------------------------

    #[tokio::test]
    async fn generate_decodes_image() {
        let body = serde_json::json!({"image": "iVBORw==", "mimeType": "image/png"}).to_string();
        let (url, server) = serve_once("200 OK", body).await;

        let image = api(url, Some("secret"))
            .generate(&GenerationRequest::new("a red fox"))
            .await
            .unwrap();
        assert_eq!(&image.bytes[..], &[0x89, b'P', b'N', b'G']);
        assert_eq!(image.mime_type, "image/png");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /generate"));
        assert!(raw.to_ascii_lowercase().contains("x-api-key: secret"));
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let (url, _server) = serve_once("429 Too Many Requests", "{\"error\":\"slow down\"}".into()).await;
        let err = api(url, Some("secret"))
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_matches!(err, GenerationError::ApiError { status: 429, ref body } if body.contains("slow down"));
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let err = api("http://127.0.0.1:9".into(), None)
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_matches!(err, GenerationError::MissingCredential);
    }
}
