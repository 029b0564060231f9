//! LLM inference boundary.
//!
//! The assessment engine only talks to [`LlmClient`]; concrete backends
//! (Ollama over HTTP, AWS Bedrock behind the `bedrock` feature) are chosen
//! once at construction through [`LlmBackend`]. Clients must be safe to call
//! from several worker threads at once.

pub mod backend;
#[cfg(feature = "bedrock")]
pub mod bedrock;
pub mod mock;
pub mod ollama;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Metering;

pub use backend::LlmBackend;
pub use mock::MockLlmClient;
pub use ollama::OllamaClient;

/// Supported page image encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl ImageFormat {
    /// Sniff the format from the leading magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            _ => None,
        }
    }
}

/// One piece of a prompt. Image bytes are reference-counted so the shared
/// section prompt can be cloned into every task cheaply.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFragment {
    Text(String),
    Image { format: ImageFormat, bytes: Arc<[u8]> },
    /// Boundary after which content differs per task. Backends with prompt
    /// caching place their cache marker here; others ignore it.
    CachePoint,
}

/// Sampling and length controls for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub max_tokens: u32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: Some(5),
            top_p: Some(0.1),
            max_tokens: 10_000,
        }
    }
}

/// A single inference request.
#[derive(Debug, Clone)]
pub struct LlmRequest<'a> {
    /// Metering context, e.g. `"granular_assessment"`.
    pub context: &'a str,
    pub model_id: &'a str,
    pub system_prompt: &'a str,
    pub content: &'a [ContentFragment],
    pub params: &'a InferenceParams,
}

impl LlmRequest<'_> {
    /// All text fragments joined in order (images and cache points skipped).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|f| match f {
                ContentFragment::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self) -> impl Iterator<Item = (ImageFormat, &[u8])> {
        self.content.iter().filter_map(|f| match f {
            ContentFragment::Image { format, bytes } => Some((*format, &bytes[..])),
            _ => None,
        })
    }

    /// Metering key for this request on the given backend.
    pub fn metering_key(&self, backend: &str) -> String {
        format!("{}/{}/{}", self.context, backend, self.model_id)
    }
}

/// Model output plus what it cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub metering: Metering,
}

/// Inference abstraction (allows mocking)
pub trait LlmClient: Send + Sync {
    fn invoke(&self, request: &LlmRequest<'_>) -> Result<LlmResponse, LlmError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// A provider error carrying the service's own error code.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("LLM endpoint is not reachable at {0}")]
    NotReachable(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned an error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed LLM response: {0}")]
    ResponseParsing(String),

    #[error("Invalid LLM configuration: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Provider error code, with HTTP throttling statuses mapped onto the
    /// equivalent service codes.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code.as_str()),
            Self::Api { status: 429, .. } => Some("TooManyRequestsException"),
            Self::Api { status: 503, .. } => Some("ServiceUnavailableException"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_png_and_jpeg() {
        assert_eq!(
            ImageFormat::detect(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::detect(b"hello"), None);
    }

    #[test]
    fn detects_webp() {
        assert_eq!(ImageFormat::detect(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
    }

    #[test]
    fn request_text_skips_images_and_cache_points() {
        let content = vec![
            ContentFragment::Text("base ".into()),
            ContentFragment::Image {
                format: ImageFormat::Png,
                bytes: Arc::from(vec![1u8, 2, 3]),
            },
            ContentFragment::CachePoint,
            ContentFragment::Text("task".into()),
        ];
        let params = InferenceParams::default();
        let req = LlmRequest {
            context: "granular_assessment",
            model_id: "m",
            system_prompt: "",
            content: &content,
            params: &params,
        };
        assert_eq!(req.text(), "base task");
        assert_eq!(req.images().count(), 1);
        assert_eq!(req.metering_key("ollama"), "granular_assessment/ollama/m");
    }

    #[test]
    fn http_throttling_statuses_map_to_codes() {
        let err = LlmError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.code(), Some("TooManyRequestsException"));
        assert_eq!(LlmError::Network("reset".into()).code(), None);
    }
}
