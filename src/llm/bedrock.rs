//! AWS Bedrock backend over the Converse API.
//!
//! Credentials follow the default AWS chain (environment, shared config,
//! instance role). The SDK client is async; a private multi-threaded runtime
//! drives it so the rest of the engine stays synchronous. `Runtime::block_on`
//! takes `&self`, so concurrent workers can share one client.
//!
//! `top_k` is not forwarded: Converse has no portable field for it.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use aws_sdk_bedrockruntime::{
    error::{DisplayErrorContext, ProvideErrorMetadata},
    primitives::Blob,
    types::{
        CachePointBlock, CachePointType, ContentBlock, ConversationRole, ImageBlock,
        ImageFormat as BedrockImageFormat, ImageSource, InferenceConfiguration, Message,
        SystemContentBlock,
    },
    Client,
};

use super::{ContentFragment, ImageFormat, LlmClient, LlmError, LlmRequest, LlmResponse};
use crate::models::{Metering, TokenUsage};

pub struct BedrockClient {
    client: Client,
    runtime: tokio::runtime::Runtime,
}

impl BedrockClient {
    /// Build a client, optionally pinned to a region.
    pub fn new(region: Option<&str>) -> Result<Self, LlmError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| LlmError::Configuration(format!("tokio runtime: {e}")))?;

        let config = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(aws_config::Region::new(region.to_string()));
            }
            loader.load().await
        });

        Ok(Self {
            client: Client::new(&config),
            runtime,
        })
    }
}

fn image_format(format: ImageFormat) -> BedrockImageFormat {
    match format {
        ImageFormat::Png => BedrockImageFormat::Png,
        ImageFormat::Jpeg => BedrockImageFormat::Jpeg,
        ImageFormat::Webp => BedrockImageFormat::Webp,
        ImageFormat::Gif => BedrockImageFormat::Gif,
    }
}

fn content_blocks(fragments: &[ContentFragment]) -> Result<Vec<ContentBlock>, LlmError> {
    let build_err = |e: aws_sdk_bedrockruntime::error::BuildError| {
        LlmError::Configuration(format!("building Converse content: {e}"))
    };

    fragments
        .iter()
        .map(|fragment| match fragment {
            ContentFragment::Text(text) => Ok(ContentBlock::Text(text.clone())),
            ContentFragment::Image { format, bytes } => ImageBlock::builder()
                .format(image_format(*format))
                .source(ImageSource::Bytes(Blob::new(bytes.to_vec())))
                .build()
                .map(ContentBlock::Image)
                .map_err(build_err),
            ContentFragment::CachePoint => CachePointBlock::builder()
                .r#type(CachePointType::Default)
                .build()
                .map(ContentBlock::CachePoint)
                .map_err(build_err),
        })
        .collect()
}

impl LlmClient for BedrockClient {
    fn invoke(&self, request: &LlmRequest<'_>) -> Result<LlmResponse, LlmError> {
        let message = Message::builder()
            .role(ConversationRole::User)
            .set_content(Some(content_blocks(request.content)?))
            .build()
            .map_err(|e| LlmError::Configuration(format!("building Converse message: {e}")))?;

        let inference = InferenceConfiguration::builder()
            .temperature(request.params.temperature)
            .set_top_p(request.params.top_p)
            .max_tokens(request.params.max_tokens as i32)
            .build();

        let mut call = self
            .client
            .converse()
            .model_id(request.model_id)
            .messages(message)
            .inference_config(inference);
        if !request.system_prompt.is_empty() {
            call = call.system(SystemContentBlock::Text(request.system_prompt.to_string()));
        }

        let response = self.runtime.block_on(call.send()).map_err(|e| {
            let code = e.code().unwrap_or("BedrockError").to_string();
            let message = e
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&e).to_string());
            LlmError::Service { code, message }
        })?;

        let text = response
            .output()
            .and_then(|o| o.as_message().ok())
            .map(|m| {
                m.content()
                    .iter()
                    .filter_map(|b| b.as_text().ok().map(String::as_str))
                    .collect::<String>()
            })
            .ok_or_else(|| LlmError::ResponseParsing("no message in Converse output".into()))?;

        let mut metering = Metering::new();
        if let Some(usage) = response.usage() {
            metering.record(
                request.metering_key("bedrock"),
                TokenUsage {
                    input_tokens: usage.input_tokens() as u64,
                    output_tokens: usage.output_tokens() as u64,
                    total_tokens: usage.total_tokens() as u64,
                    cache_read_input_tokens: usage.cache_read_input_tokens().unwrap_or(0) as u64,
                    cache_write_input_tokens: usage.cache_write_input_tokens().unwrap_or(0) as u64,
                },
            );
        }

        Ok(LlmResponse { text, metering })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fragments_map_to_converse_blocks() {
        let blocks = content_blocks(&[
            ContentFragment::Text("a".into()),
            ContentFragment::Image {
                format: ImageFormat::Jpeg,
                bytes: Arc::from(vec![0xFFu8, 0xD8]),
            },
            ContentFragment::CachePoint,
        ])
        .unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].is_text());
        assert!(blocks[1].is_image());
        assert!(blocks[2].is_cache_point());
    }
}
