//! Section-level entry point of the granular assessment engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use super::aggregator::aggregate;
use super::cache::TaskCache;
use super::error::AssessmentError;
use super::executor::TaskExecutor;
use super::planner::plan;
use super::prompt::{PromptAssembler, SectionContext, DEFAULT_TASK_PROMPT};
use super::retry::{find_throttling, summarize_failures};
use super::schema::SchemaRegistry;
use super::types::{AssessmentResult, AssessmentTask};
use crate::config::AssessmentConfig;
use crate::llm::{LlmBackend, LlmClient};
use crate::models::{Document, DocumentStatus, Section};
use crate::store::{CacheBackend, CacheStore, ObjectStore};

/// How a section run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    /// Every task succeeded.
    Succeeded,
    /// Some tasks failed non-transiently; the rest was merged and written.
    PartiallyFailed,
    /// Nothing could be assessed (no schema, or every task failed).
    Failed,
}

/// Counters for one section run.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionOutcome {
    pub status: SectionStatus,
    pub tasks_total: usize,
    pub tasks_successful: usize,
    pub tasks_failed: usize,
    pub tasks_cached: usize,
    pub alerts: usize,
    pub elapsed_seconds: f64,
}

impl SectionOutcome {
    fn failed(elapsed_seconds: f64) -> Self {
        Self {
            status: SectionStatus::Failed,
            tasks_total: 0,
            tasks_successful: 0,
            tasks_failed: 0,
            tasks_cached: 0,
            alerts: 0,
            elapsed_seconds,
        }
    }
}

/// The granular assessment engine. Collaborators are injected; nothing is
/// looked up from global state.
pub struct GranularAssessmentService {
    config: AssessmentConfig,
    registry: SchemaRegistry,
    llm: Arc<dyn LlmClient>,
    objects: Arc<dyn ObjectStore>,
    cache: TaskCache,
}

impl GranularAssessmentService {
    pub fn new(
        config: AssessmentConfig,
        llm: Arc<dyn LlmClient>,
        objects: Arc<dyn ObjectStore>,
        cache_store: Arc<dyn CacheStore>,
    ) -> Result<Self, AssessmentError> {
        let config = config.validated();
        let registry = SchemaRegistry::from_values(&config.classes)?;
        let cache = TaskCache::new(cache_store, config.cache.ttl());
        tracing::info!(
            classes = registry.len(),
            model = %config.model_id,
            max_workers = config.granular.max_workers,
            "Granular assessment service ready"
        );
        Ok(Self {
            config,
            registry,
            llm,
            objects,
            cache,
        })
    }

    /// Build the LLM backend and cache store named in `config`.
    pub fn from_config(
        config: AssessmentConfig,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, AssessmentError> {
        let llm = LlmBackend::from_config(&config.llm)?;
        let cache = CacheBackend::from_config(&config.cache)?;
        Self::new(config, Arc::new(llm), objects, Arc::new(cache))
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.config
    }

    /// Assess every section of `document` in order. Stops at the first
    /// error, including a retryable throttle.
    pub fn process_document(
        &self,
        document: &mut Document,
    ) -> Result<Vec<SectionOutcome>, AssessmentError> {
        let section_ids: Vec<String> = document
            .sections
            .iter()
            .filter(|s| s.extraction_result_uri.is_some())
            .map(|s| s.section_id.clone())
            .collect();
        section_ids
            .iter()
            .map(|id| self.process_section(document, id))
            .collect()
    }

    /// Assess one section and write the merged assessment back to its
    /// extraction result.
    ///
    /// Returns [`AssessmentError::Throttled`] when any task was rate
    /// limited; results that did succeed are cached first so a retry only
    /// re-runs the rest. Other task failures do not return an error: they
    /// are listed on the document, which is marked failed.
    pub fn process_section(
        &self,
        document: &mut Document,
        section_id: &str,
    ) -> Result<SectionOutcome, AssessmentError> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "assess_section",
            %run_id,
            document_id = %document.id,
            section_id
        );
        let _guard = span.enter();

        let section: Section = document
            .section(section_id)
            .cloned()
            .ok_or_else(|| AssessmentError::SectionNotFound {
                document_id: document.id.clone(),
                section_id: section_id.to_string(),
            })?;
        let uri = section
            .extraction_result_uri
            .clone()
            .ok_or_else(|| AssessmentError::MissingExtractionResult(section_id.to_string()))?;

        let mut result_doc = self.objects.get_json(&uri)?;
        let extraction: Map<String, Value> = result_doc
            .get("inference_result")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| AssessmentError::InvalidExtractionResult(uri.clone()))?;

        let Some(schema) = self.registry.get(&section.classification) else {
            let err = AssessmentError::SchemaNotFound(section.classification.clone());
            tracing::error!(error = %err, "Cannot assess section");
            document.add_errors([format!("Section {section_id}: {err}")]);
            document.status = DocumentStatus::Failed;
            return Ok(SectionOutcome::failed(started.elapsed().as_secs_f64()));
        };

        let granular = &self.config.granular;
        let default_threshold = self.config.default_confidence_threshold;
        let tasks = plan(
            &extraction,
            schema,
            default_threshold,
            granular.simple_batch_size,
            granular.list_batch_size,
        );

        let workflow_run_id = document.workflow_run_id.clone();
        let mut cached = self
            .cache
            .read(&document.id, workflow_run_id.as_deref(), section_id);
        let (mut results, to_run): (Vec<AssessmentResult>, Vec<AssessmentTask>) =
            split_cached(&tasks, &mut cached);
        let tasks_cached = results.len();
        tracing::info!(
            tasks = tasks.len(),
            cached = tasks_cached,
            to_run = to_run.len(),
            "Starting granular assessment"
        );

        if !to_run.is_empty() {
            let context = SectionContext::load(self.objects.as_ref(), document, &section);
            let template = self.config.task_prompt.as_deref().unwrap_or(DEFAULT_TASK_PROMPT);
            let assembler = PromptAssembler::new(template, &context);
            let executor = TaskExecutor {
                llm: self.llm.as_ref(),
                assembler: &assembler,
                context: &context,
                schema,
                model_id: &self.config.model_id,
                system_prompt: &self.config.system_prompt,
                params: &self.config.inference,
                default_threshold,
            };
            results.extend(executor.execute(&to_run, granular.max_workers));
        }

        let failed: Vec<&AssessmentResult> = results.iter().filter(|r| !r.success).collect();
        if !failed.is_empty() {
            self.cache
                .write(&document.id, workflow_run_id.as_deref(), section_id, &results);
        }

        if let Some(throttle) = find_throttling(failed.iter().copied()) {
            for result in results.iter().filter(|r| !r.from_cache) {
                if let Some(m) = &result.metering {
                    document.metering.merge(m);
                }
            }
            tracing::warn!(
                task_id = %throttle.task_id,
                error = %throttle.message,
                "Throttled, section must be retried"
            );
            return Err(AssessmentError::Throttled {
                task_id: throttle.task_id,
                code: throttle.code,
                message: throttle.message,
            });
        }

        let aggregation = aggregate(&tasks, &results, &extraction, default_threshold);
        let tasks_failed = failed.len();
        let tasks_successful = results.len() - tasks_failed;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        result_doc["explainability_info"] = json!([Value::Object(aggregation.assessment)]);
        let metadata = json!({
            "granular_assessment_used": true,
            "assessment_tasks_total": tasks.len(),
            "assessment_tasks_successful": tasks_successful,
            "assessment_tasks_failed": tasks_failed,
            "assessment_tasks_cached": tasks_cached,
            "assessment_time_seconds": elapsed_seconds,
        });
        merge_metadata(&mut result_doc, metadata);
        // Merged before the write-back: cached tasks are not metered again on retry.
        document.metering.merge(&aggregation.metering);
        self.objects.write_json(&uri, &result_doc)?;

        let alerts = aggregation.alerts.len();
        if let Some(section) = document.section_mut(section_id) {
            section.confidence_threshold_alerts = aggregation.alerts;
        }

        let status = if tasks_failed == 0 {
            SectionStatus::Succeeded
        } else {
            let failed_ids: Vec<&str> = failed.iter().map(|r| r.task_id.as_str()).collect();
            tracing::error!(failed = ?failed_ids, "Assessment tasks failed");
            document.add_errors(summarize_failures(&failed));
            document.status = DocumentStatus::Failed;
            if tasks_successful == 0 {
                SectionStatus::Failed
            } else {
                SectionStatus::PartiallyFailed
            }
        };

        tracing::info!(
            ?status,
            succeeded = tasks_successful,
            failed = tasks_failed,
            cached = tasks_cached,
            alerts,
            seconds = elapsed_seconds,
            "Granular assessment finished"
        );

        Ok(SectionOutcome {
            status,
            tasks_total: tasks.len(),
            tasks_successful,
            tasks_failed,
            tasks_cached,
            alerts,
            elapsed_seconds,
        })
    }
}

/// Cached results for planned tasks, and the tasks still to run. Cache
/// entries for tasks no longer planned are dropped.
fn split_cached(
    tasks: &[AssessmentTask],
    cached: &mut std::collections::HashMap<String, AssessmentResult>,
) -> (Vec<AssessmentResult>, Vec<AssessmentTask>) {
    let mut hits = Vec::new();
    let mut to_run = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.task_id.as_str()) {
            continue;
        }
        match cached.remove(&task.task_id) {
            Some(result) => hits.push(result),
            None => to_run.push(task.clone()),
        }
    }
    (hits, to_run)
}

fn merge_metadata(result_doc: &mut Value, metadata: Value) {
    let Value::Object(root) = result_doc else {
        return;
    };
    let entry = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let (Value::Object(target), Value::Object(source)) = (entry, metadata) {
        target.extend(source);
    }
}
