use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{ContentFragment, LlmClient, LlmError, LlmRequest, LlmResponse};
use crate::models::{Metering, TokenUsage};

/// Ollama HTTP client using the chat endpoint (images ride on the user message).
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    /// Base64-encoded images (user message only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    num_predict: u32,
}

/// Response body from Ollama /api/chat (non-streaming)
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

fn build_chat_request<'a>(request: &'a LlmRequest<'_>) -> ChatRequest<'a> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut text = String::new();
    let mut images = Vec::new();
    for fragment in request.content {
        match fragment {
            ContentFragment::Text(t) => text.push_str(t),
            ContentFragment::Image { bytes, .. } => images.push(engine.encode(bytes)),
            ContentFragment::CachePoint => {}
        }
    }

    let mut messages = Vec::with_capacity(2);
    if !request.system_prompt.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: request.system_prompt.to_string(),
            images: Vec::new(),
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: text,
        images,
    });

    ChatRequest {
        model: request.model_id,
        messages,
        stream: false,
        options: ChatOptions {
            temperature: request.params.temperature,
            top_k: request.params.top_k,
            top_p: request.params.top_p,
            num_predict: request.params.max_tokens,
        },
    }
}

impl LlmClient for OllamaClient {
    fn invoke(&self, request: &LlmRequest<'_>) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = build_chat_request(request);

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                LlmError::NotReachable(self.base_url.clone())
            } else if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        let metering = Metering::single(
            request.metering_key("ollama"),
            TokenUsage::new(parsed.prompt_eval_count, parsed.eval_count),
        );

        Ok(LlmResponse {
            text: parsed.message.content,
            metering,
        })
    }
}
