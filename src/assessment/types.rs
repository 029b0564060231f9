//! Work units and their outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::DatabaseError;
use crate::llm::LlmError;
use crate::models::enums::str_enum;
use crate::models::Metering;

str_enum!(
    /// How a task slices the extracted values.
    TaskType {
        SimpleBatch => "simple_batch",
        Group => "group",
        ListItem => "list_item",
    }
);

/// A unit of LLM work. Created by the planner, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentTask {
    /// Stable across retries, e.g. `simple_batch_0`, `group_Address`,
    /// `list_LineItems_item_7`.
    pub task_id: String,
    pub task_type: TaskType,
    /// Top-level field names covered. Group and list tasks name exactly one.
    pub attributes: Vec<String>,
    /// `{field: value}` for batches and groups; the bare item for list items.
    pub extraction_data: Value,
    /// Threshold per schema path (dot-joined, no list indices).
    pub confidence_thresholds: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_item_index: Option<usize>,
}

impl AssessmentTask {
    /// The single field a group or list task covers.
    pub fn primary_attribute(&self) -> Option<&str> {
        self.attributes.first().map(String::as_str)
    }
}

/// Why a task did not succeed. Kept alongside the result for retry
/// classification; never cached.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailure {
    /// The model answered but the answer was not a JSON object.
    Parse(String),
    /// The inference call itself failed.
    Call(LlmError),
}

impl TaskFailure {
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub task_id: String,
    pub success: bool,
    /// Field name to assessment (`{confidence, confidence_reason, geometry?}`
    /// at the leaves).
    #[serde(default)]
    pub assessment_data: Map<String, Value>,
    #[serde(default)]
    pub confidence_alerts: Vec<ConfidenceAlert>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub metering: Option<Metering>,
    #[serde(skip)]
    pub failure: Option<TaskFailure>,
    /// Set when the result was served from the task cache in this run.
    #[serde(skip)]
    pub from_cache: bool,
}

impl AssessmentResult {
    pub fn succeeded(task_id: &str, assessment_data: Map<String, Value>) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: true,
            assessment_data,
            confidence_alerts: Vec::new(),
            error_message: None,
            processing_time: 0.0,
            metering: None,
            failure: None,
            from_cache: false,
        }
    }

    pub fn failed(task_id: &str, failure: TaskFailure, error_message: String) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: false,
            assessment_data: Map::new(),
            confidence_alerts: Vec::new(),
            error_message: Some(error_message),
            processing_time: 0.0,
            metering: None,
            failure: Some(failure),
            from_cache: false,
        }
    }
}

/// A field whose confidence fell below its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAlert {
    /// Fully qualified, e.g. `Address.City` or `LineItems[2].Amount`.
    pub attribute_name: String,
    pub confidence: f64,
    pub confidence_threshold: f64,
}

/// A leaf assessment is any object carrying a `confidence` key.
pub fn is_leaf_assessment(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("confidence"))
}

/// Numeric confidence of a leaf, accepting numeric strings.
pub fn leaf_confidence(leaf: &Map<String, Value>) -> Option<f64> {
    match leaf.get("confidence")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn task_type_serializes_as_snake_case() {
        assert_eq!(serde_json::to_value(TaskType::ListItem).unwrap(), json!("list_item"));
        assert_eq!(TaskType::SimpleBatch.to_string(), "simple_batch");
    }

    #[test]
    fn failure_and_cache_flag_are_not_serialized() {
        let mut result = AssessmentResult::failed(
            "group_A",
            TaskFailure::Parse("eof".into()),
            "could not parse".into(),
        );
        result.from_cache = true;
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("failure").is_none());
        assert!(json.get("from_cache").is_none());

        let back: AssessmentResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.failure, None);
        assert!(!back.from_cache);
        assert_eq!(back.error_message.as_deref(), Some("could not parse"));
    }

    #[test]
    fn leaf_detection_and_confidence() {
        let leaf = json!({"confidence": "0.75", "confidence_reason": "clear"});
        assert!(is_leaf_assessment(&leaf));
        assert_eq!(leaf_confidence(leaf.as_object().unwrap()), Some(0.75));
        assert!(!is_leaf_assessment(&json!({"City": {"confidence": 1.0}})));
    }
}
