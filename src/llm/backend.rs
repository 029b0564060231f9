use super::{LlmClient, LlmError, LlmRequest, LlmResponse, OllamaClient};
use crate::config::{LlmBackendKind, LlmConfig};

/// The configured inference backend, selected once at startup.
pub enum LlmBackend {
    Ollama(OllamaClient),
    #[cfg(feature = "bedrock")]
    Bedrock(super::bedrock::BedrockClient),
}

impl LlmBackend {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let backend = match config.backend {
            LlmBackendKind::Ollama => {
                Self::Ollama(OllamaClient::new(&config.endpoint, config.timeout_secs)?)
            }
            #[cfg(feature = "bedrock")]
            LlmBackendKind::Bedrock => {
                Self::Bedrock(super::bedrock::BedrockClient::new(config.region.as_deref())?)
            }
            #[cfg(not(feature = "bedrock"))]
            LlmBackendKind::Bedrock => {
                return Err(LlmError::Configuration(
                    "the bedrock backend requires building with the `bedrock` feature".into(),
                ))
            }
        };
        tracing::info!(
            backend = backend.name(),
            endpoint = backend.endpoint().unwrap_or("-"),
            region = ?config.region,
            "Inference backend ready"
        );
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ollama(_) => "ollama",
            #[cfg(feature = "bedrock")]
            Self::Bedrock(_) => "bedrock",
        }
    }

    /// HTTP endpoint for backends that have one.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Ollama(client) => Some(client.base_url()),
            #[cfg(feature = "bedrock")]
            Self::Bedrock(_) => None,
        }
    }
}

impl LlmClient for LlmBackend {
    fn invoke(&self, request: &LlmRequest<'_>) -> Result<LlmResponse, LlmError> {
        match self {
            Self::Ollama(client) => client.invoke(request),
            #[cfg(feature = "bedrock")]
            Self::Bedrock(client) => client.invoke(request),
        }
    }
}
