//! Engine configuration.
//!
//! Loaded from a JSON file, then overridden from the environment, then
//! clamped by [`AssessmentConfig::validated`]. Every field has a default so a
//! partial file is valid.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::llm::InferenceParams;

pub const APP_NAME: &str = "granular-assessment";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "granular_assessment=info,warn"
}

/// Application data directory, e.g. `~/.local/share/granular-assessment`.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    pub model_id: String,
    pub system_prompt: String,
    /// Task prompt template; the built-in template is used when absent.
    pub task_prompt: Option<String>,
    #[serde(flatten)]
    pub inference: InferenceParams,
    pub default_confidence_threshold: f64,
    pub granular: GranularConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    /// Document-class JSON schemas.
    pub classes: Vec<serde_json::Value>,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            model_id: "llama3.2-vision".into(),
            system_prompt: "You are a document analysis assessment expert. Your role is to \
                evaluate the confidence and accuracy of data extraction results by analyzing \
                them against source documents. Respond only with JSON."
                .into(),
            task_prompt: None,
            inference: InferenceParams::default(),
            default_confidence_threshold: 0.9,
            granular: GranularConfig::default(),
            cache: CacheConfig::default(),
            llm: LlmConfig::default(),
            classes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GranularConfig {
    pub max_workers: usize,
    pub simple_batch_size: usize,
    /// Outer iteration stride over list items. Each item is still its own task.
    pub list_batch_size: usize,
}

impl Default for GranularConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            simple_batch_size: 3,
            list_batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Sqlite,
    Memory,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// SQLite file; defaults to `<app data>/task_cache.db`.
    pub path: Option<PathBuf>,
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Sqlite,
            path: None,
            ttl_hours: 24,
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| app_data_dir().join("task_cache.db"))
    }

    /// Cache entry lifetime, capped at ten years.
    pub fn ttl(&self) -> chrono::Duration {
        const MAX_TTL_HOURS: u64 = 24 * 365 * 10;
        chrono::Duration::hours(self.ttl_hours.min(MAX_TTL_HOURS) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackendKind {
    Ollama,
    Bedrock,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackendKind,
    pub endpoint: String,
    pub timeout_secs: u64,
    /// AWS region for Bedrock; the default provider chain is used when absent.
    pub region: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackendKind::Ollama,
            endpoint: "http://localhost:11434".into(),
            timeout_secs: 300,
            region: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl AssessmentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Apply `ASSESSMENT_MODEL_ID`, `ASSESSMENT_MAX_WORKERS`,
    /// `ASSESSMENT_CACHE_PATH`, `OLLAMA_HOST` and `AWS_REGION`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("ASSESSMENT_MODEL_ID").filter(|v| !v.is_empty()) {
            self.model_id = model;
        }
        if let Some(raw) = lookup("ASSESSMENT_MAX_WORKERS") {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.granular.max_workers = n,
                Err(e) => tracing::warn!(value = %raw, error = %e, "Ignoring ASSESSMENT_MAX_WORKERS"),
            }
        }
        if let Some(path) = lookup("ASSESSMENT_CACHE_PATH").filter(|v| !v.is_empty()) {
            self.cache.path = Some(PathBuf::from(path));
        }
        if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.is_empty()) {
            self.llm.endpoint = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{host}")
            };
        }
        if let Some(region) = lookup("AWS_REGION").filter(|v| !v.is_empty()) {
            self.llm.region = Some(region);
        }
    }

    /// Clamp worker and batch sizes to at least 1.
    pub fn validated(mut self) -> Self {
        self.granular.max_workers = self.granular.max_workers.max(1);
        self.granular.simple_batch_size = self.granular.simple_batch_size.max(1);
        self.granular.list_batch_size = self.granular.list_batch_size.max(1);
        self
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = AssessmentConfig::from_json("{}").unwrap();
        assert_eq!(config.granular, GranularConfig::default());
        assert_eq!(config.cache.backend, CacheBackendKind::Sqlite);
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.llm.backend, LlmBackendKind::Ollama);
        assert!((config.default_confidence_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.inference, InferenceParams::default());
    }

    #[test]
    fn flattened_inference_params_parse() {
        let config = AssessmentConfig::from_json(
            r#"{"model_id": "qwen2.5vl", "temperature": 0.2, "max_tokens": 512,
                "granular": {"max_workers": 8}, "cache": {"backend": "memory"}}"#,
        )
        .unwrap();
        assert_eq!(config.model_id, "qwen2.5vl");
        assert!((config.inference.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.inference.max_tokens, 512);
        assert_eq!(config.inference.top_k, Some(5), "unset keys keep defaults");
        assert_eq!(config.granular.max_workers, 8);
        assert_eq!(config.granular.simple_batch_size, 3);
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
    }

    #[test]
    fn validated_clamps_sizes() {
        let mut config = AssessmentConfig::default();
        config.granular = GranularConfig {
            max_workers: 0,
            simple_batch_size: 0,
            list_batch_size: 0,
        };
        let config = config.validated();
        assert_eq!(config.granular.max_workers, 1);
        assert_eq!(config.granular.simple_batch_size, 1);
        assert_eq!(config.granular.list_batch_size, 1);
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ASSESSMENT_MODEL_ID", "llava"),
            ("ASSESSMENT_MAX_WORKERS", "12"),
            ("ASSESSMENT_CACHE_PATH", "/tmp/cache.db"),
            ("OLLAMA_HOST", "gpu-box:11434"),
            ("AWS_REGION", "eu-west-1"),
        ]
        .into_iter()
        .collect();

        let mut config = AssessmentConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.model_id, "llava");
        assert_eq!(config.granular.max_workers, 12);
        assert_eq!(config.cache.resolved_path(), PathBuf::from("/tmp/cache.db"));
        assert_eq!(config.llm.endpoint, "http://gpu-box:11434");
        assert_eq!(config.llm.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn bad_worker_override_is_ignored() {
        let mut config = AssessmentConfig::default();
        config.apply_overrides(|k| (k == "ASSESSMENT_MAX_WORKERS").then(|| "many".to_string()));
        assert_eq!(config.granular.max_workers, 4);
    }

    #[test]
    fn from_file_reads_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"llm": {{"timeout_secs": 30}}}}"#).unwrap();
        let config = AssessmentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.timeout_secs, 30);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AssessmentConfig::from_file(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn default_cache_path_under_app_data() {
        let config = AssessmentConfig::default();
        assert!(config.cache.resolved_path().starts_with(app_data_dir()));
        assert_eq!(config.cache.ttl(), chrono::Duration::hours(24));
    }
}
