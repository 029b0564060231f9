use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{LlmClient, LlmError, LlmRequest, LlmResponse};
use crate::models::{Metering, TokenUsage};

type Responder = dyn Fn(&LlmRequest<'_>) -> Result<LlmResponse, LlmError> + Send + Sync;

/// Scripted LLM client for tests and dry runs.
///
/// Every call is counted and its prompt text recorded, so callers can assert
/// how many tasks actually reached the model.
pub struct MockLlmClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    /// Always answer with `response`, metered at 10 input / 5 output tokens.
    pub fn new(response: &str) -> Self {
        let response = response.to_string();
        Self::with_responder(move |req| Ok(Self::reply(req, &response)))
    }

    /// Always fail with `error`.
    pub fn failing(error: LlmError) -> Self {
        Self::with_responder(move |_| Err(error.clone()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&LlmRequest<'_>) -> Result<LlmResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A successful response carrying the standard mock metering.
    pub fn reply(request: &LlmRequest<'_>, text: &str) -> LlmResponse {
        LlmResponse {
            text: text.to_string(),
            metering: Metering::single(request.metering_key("mock"), TokenUsage::new(10, 5)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn invoke(&self, request: &LlmRequest<'_>) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.text());
        }
        (self.responder)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ContentFragment, InferenceParams};

    #[test]
    fn records_calls_and_prompts() {
        let mock = MockLlmClient::new("{}");
        let content = vec![ContentFragment::Text("hello".into())];
        let params = InferenceParams::default();
        let req = LlmRequest {
            context: "granular_assessment",
            model_id: "m",
            system_prompt: "",
            content: &content,
            params: &params,
        };
        let resp = mock.invoke(&req).unwrap();
        assert_eq!(resp.text, "{}");
        assert_eq!(resp.metering.total_tokens(), 15);
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.prompts(), vec!["hello".to_string()]);
    }

    #[test]
    fn failing_mock_returns_error() {
        let mock = MockLlmClient::failing(LlmError::Service {
            code: "ThrottlingException".into(),
            message: "Rate exceeded".into(),
        });
        let content: Vec<ContentFragment> = vec![];
        let params = InferenceParams::default();
        let req = LlmRequest {
            context: "c",
            model_id: "m",
            system_prompt: "",
            content: &content,
            params: &params,
        };
        assert_eq!(mock.invoke(&req).unwrap_err().code(), Some("ThrottlingException"));
    }
}
