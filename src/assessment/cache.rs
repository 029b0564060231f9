//! Per-section cache of succeeded task results.
//!
//! Read once before a run and written once after a run that had failures,
//! so a retried section only re-pays for the tasks that failed. Cache
//! problems are logged and treated as a miss; they never fail the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use super::types::AssessmentResult;
use crate::store::CacheStore;

pub struct TaskCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

/// Cache key for a section. Only the last `:` or `/` separated segment of
/// the workflow run id is used.
pub fn cache_key(document_id: &str, workflow_run_id: Option<&str>, section_id: &str) -> String {
    let run = workflow_run_id
        .map(|id| id.rsplit(|c: char| c == ':' || c == '/').next().unwrap_or(id))
        .filter(|s| !s.is_empty())
        .unwrap_or("none");
    format!("cache#{document_id}#workflow#{run}#section#{section_id}")
}

impl TaskCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Succeeded results from a previous run, by task id. Empty on miss,
    /// malformed payload or store error.
    pub fn read(
        &self,
        document_id: &str,
        workflow_run_id: Option<&str>,
        section_id: &str,
    ) -> HashMap<String, AssessmentResult> {
        let key = cache_key(document_id, workflow_run_id, section_id);
        let payload = match self.store.get(&key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Task cache read failed, starting fresh");
                return HashMap::new();
            }
        };

        let results: Vec<AssessmentResult> = match serde_json::from_str(&payload) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring malformed task cache entry");
                return HashMap::new();
            }
        };

        let cached: HashMap<String, AssessmentResult> = results
            .into_iter()
            .filter(|r| r.success)
            .map(|mut r| {
                r.from_cache = true;
                (r.task_id.clone(), r)
            })
            .collect();
        tracing::info!(key = %key, cached = cached.len(), "Loaded cached task results");
        cached
    }

    /// Store the succeeded results, replacing any previous entry. Nothing is
    /// written when there are none.
    pub fn write(
        &self,
        document_id: &str,
        workflow_run_id: Option<&str>,
        section_id: &str,
        results: &[AssessmentResult],
    ) {
        let succeeded: Vec<&AssessmentResult> = results.iter().filter(|r| r.success).collect();
        if succeeded.is_empty() {
            return;
        }

        let key = cache_key(document_id, workflow_run_id, section_id);
        let payload = match serde_json::to_string(&succeeded) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cannot serialize task results for cache");
                return;
            }
        };

        match self.store.put(&key, &payload, Utc::now() + self.ttl) {
            Ok(()) => tracing::info!(
                key = %key,
                stored = succeeded.len(),
                "Cached succeeded task results"
            ),
            Err(e) => tracing::warn!(key = %key, error = %e, "Task cache write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::assessment::types::TaskFailure;
    use crate::store::{MemoryCacheStore, SqliteCacheStore};

    fn ok(task_id: &str) -> AssessmentResult {
        let mut data = Map::new();
        data.insert("A".into(), json!({"confidence": 0.9}));
        AssessmentResult::succeeded(task_id, data)
    }

    fn failed(task_id: &str) -> AssessmentResult {
        AssessmentResult::failed(task_id, TaskFailure::Parse("x".into()), "x".into())
    }

    #[test]
    fn key_uses_last_workflow_segment() {
        assert_eq!(
            cache_key(
                "doc.pdf",
                Some("arn:aws:states:us-east-1:123:execution:Flow:run-42"),
                "3"
            ),
            "cache#doc.pdf#workflow#run-42#section#3"
        );
        assert_eq!(
            cache_key("d", Some("runs/2026/abc"), "1"),
            "cache#d#workflow#abc#section#1"
        );
        assert_eq!(cache_key("d", None, "1"), "cache#d#workflow#none#section#1");
    }

    #[test]
    fn write_then_read_keeps_only_successes() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = TaskCache::new(store.clone(), Duration::hours(24));
        cache.write("d", Some("wf:1"), "s", &[ok("simple_batch_0"), failed("group_A")]);

        let read = cache.read("d", Some("other:prefix:1"), "s");
        assert_eq!(read.len(), 1);
        let hit = &read["simple_batch_0"];
        assert!(hit.from_cache);
        assert_eq!(hit.assessment_data["A"]["confidence"], 0.9);
    }

    #[test]
    fn empty_write_is_noop() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = TaskCache::new(store.clone(), Duration::hours(24));
        cache.write("d", None, "s", &[]);
        cache.write("d", None, "s", &[failed("group_A")]);
        assert_eq!(store.put_count(), 0);
    }

    #[test]
    fn write_overwrites_previous_entry() {
        let store = Arc::new(SqliteCacheStore::in_memory().unwrap());
        let cache = TaskCache::new(store, Duration::hours(24));
        cache.write("d", None, "s", &[ok("simple_batch_0")]);
        cache.write("d", None, "s", &[ok("simple_batch_1")]);
        let read = cache.read("d", None, "s");
        assert_eq!(read.keys().collect::<Vec<_>>(), vec!["simple_batch_1"]);
    }

    #[test]
    fn store_errors_are_a_miss() {
        let cache = TaskCache::new(Arc::new(MemoryCacheStore::unavailable()), Duration::hours(24));
        cache.write("d", None, "s", &[ok("simple_batch_0")]);
        assert!(cache.read("d", None, "s").is_empty());
    }

    #[test]
    fn malformed_payload_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        store
            .put(&cache_key("d", None, "s"), "not json", Utc::now() + Duration::hours(1))
            .unwrap();
        let cache = TaskCache::new(store, Duration::hours(24));
        assert!(cache.read("d", None, "s").is_empty());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = TaskCache::new(store, Duration::seconds(-1));
        cache.write("d", None, "s", &[ok("simple_batch_0")]);
        assert!(cache.read("d", None, "s").is_empty());
    }
}
