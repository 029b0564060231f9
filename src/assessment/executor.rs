//! Runs tasks against the LLM, sequentially or on a bounded worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use super::aggregator::annotate_task;
use super::geometry::normalize_geometry;
use super::parser::parse_assessment;
use super::prompt::{PromptAssembler, SectionContext};
use super::schema::ClassSchema;
use super::types::{AssessmentResult, AssessmentTask, TaskFailure, TaskType};
use crate::llm::{InferenceParams, LlmClient, LlmRequest};

/// Metering context recorded for every call.
pub const METERING_CONTEXT: &str = "granular_assessment";

/// Confidence given to every field of a task whose answer could not be parsed.
pub const DEFAULT_PARSE_FAILURE_CONFIDENCE: f64 = 0.5;

/// Everything a task needs besides the task itself. Shared read-only by all
/// workers.
pub struct TaskExecutor<'a> {
    pub llm: &'a dyn LlmClient,
    pub assembler: &'a PromptAssembler,
    pub context: &'a SectionContext,
    pub schema: &'a ClassSchema,
    pub model_id: &'a str,
    pub system_prompt: &'a str,
    pub params: &'a InferenceParams,
    pub default_threshold: f64,
}

impl TaskExecutor<'_> {
    /// Run `tasks`. With one worker or one task they run in order; otherwise
    /// on `max_workers` threads, and results come back in completion order.
    pub fn execute(&self, tasks: &[AssessmentTask], max_workers: usize) -> Vec<AssessmentResult> {
        if max_workers <= 1 || tasks.len() <= 1 {
            return tasks.iter().map(|t| self.execute_one(t)).collect();
        }

        let workers = max_workers.min(tasks.len());
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(task) = tasks.get(index) else {
                        break;
                    };
                    if tx.send(self.execute_one(task)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        })
    }

    /// Build the prompt, call the model, parse and post-process the answer.
    /// Never fails: problems become a failed result.
    pub fn execute_one(&self, task: &AssessmentTask) -> AssessmentResult {
        let started = Instant::now();
        let content = self.assembler.task_content(task, self.schema, self.context);
        let request = LlmRequest {
            context: METERING_CONTEXT,
            model_id: self.model_id,
            system_prompt: self.system_prompt,
            content: &content,
            params: self.params,
        };

        let mut result = match self.llm.invoke(&request) {
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "Assessment call failed");
                let message = e.to_string();
                AssessmentResult::failed(&task.task_id, TaskFailure::Call(e), message)
            }
            Ok(response) => {
                let mut result = match parse_assessment(&response.text) {
                    Ok(parsed) => {
                        let mut data = normalize_task_output(task, parsed);
                        for value in data.values_mut() {
                            normalize_geometry(value);
                        }
                        let alerts = annotate_task(task, &mut data, self.default_threshold);
                        let mut result = AssessmentResult::succeeded(&task.task_id, data);
                        result.confidence_alerts = alerts;
                        result
                    }
                    Err(reason) => {
                        tracing::warn!(
                            task_id = %task.task_id,
                            error = %reason,
                            "Unparseable assessment, using default confidence"
                        );
                        let message = format!("Failed to parse assessment response: {reason}");
                        let mut result = AssessmentResult::failed(
                            &task.task_id,
                            TaskFailure::Parse(reason),
                            message.clone(),
                        );
                        result.assessment_data = default_assessment(task, &message);
                        result
                    }
                };
                result.metering = Some(response.metering);
                result
            }
        };

        result.processing_time = started.elapsed().as_secs_f64();
        tracing::debug!(
            task_id = %task.task_id,
            success = result.success,
            seconds = result.processing_time,
            "Assessment task finished"
        );
        result
    }
}

/// Key the model's answer by attribute name.
///
/// Groups and list items may come back either wrapped in their field name or
/// bare; a list item wrapped in an array is unwrapped to its first element.
/// Batches keep only the fields they asked about.
fn normalize_task_output(task: &AssessmentTask, mut parsed: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    match (task.task_type, task.primary_attribute()) {
        (TaskType::Group, Some(name)) => {
            let inner = parsed.remove(name).unwrap_or(Value::Object(parsed));
            out.insert(name.to_string(), inner);
        }
        (TaskType::ListItem, Some(name)) => {
            let inner = match parsed.remove(name) {
                Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
                Some(value) => value,
                None => Value::Object(parsed),
            };
            out.insert(name.to_string(), inner);
        }
        _ => {
            for name in &task.attributes {
                if let Some(value) = parsed.remove(name) {
                    out.insert(name.clone(), value);
                }
            }
        }
    }
    out
}

fn default_assessment(task: &AssessmentTask, reason: &str) -> Map<String, Value> {
    task.attributes
        .iter()
        .map(|name| {
            (
                name.clone(),
                json!({
                    "confidence": DEFAULT_PARSE_FAILURE_CONFIDENCE,
                    "confidence_reason": reason,
                }),
            )
        })
        .collect()
}
