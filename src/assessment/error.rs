use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("Section {section_id} not found in document {document_id}")]
    SectionNotFound {
        document_id: String,
        section_id: String,
    },

    #[error("Section {0} has no extraction result")]
    MissingExtractionResult(String),

    #[error("Extraction result at {0} has no inference_result object")]
    InvalidExtractionResult(String),

    #[error("No schema found for document class '{0}'")]
    SchemaNotFound(String),

    #[error("Invalid schema for class '{class}': {reason}")]
    InvalidSchema { class: String, reason: String },

    /// A task hit a rate limit. The whole section should be retried; cached
    /// task results make the retry cheap.
    #[error("Assessment throttled in task {task_id}: {message}")]
    Throttled {
        task_id: String,
        code: Option<String>,
        message: String,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AssessmentError {
    /// True when re-invoking the section later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_throttled_is_retryable() {
        let throttled = AssessmentError::Throttled {
            task_id: "group_Address".into(),
            code: Some("ThrottlingException".into()),
            message: "Rate exceeded".into(),
        };
        assert!(throttled.is_retryable());
        assert!(!AssessmentError::SchemaNotFound("W2".into()).is_retryable());
    }

    #[test]
    fn store_errors_convert() {
        let err: AssessmentError = StoreError::NotFound("s3://b/k".into()).into();
        assert!(matches!(err, AssessmentError::Store(StoreError::NotFound(_))));
        assert_eq!(err.to_string(), "Storage error: Object not found: s3://b/k");
    }
}
