//! Document / section model consumed and updated by the assessment engine.
//!
//! The engine reads `extraction_result_uri`, `page_ids` and `classification`
//! from a section and writes back its confidence alerts, plus the owning
//! document's error list, status and metering totals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::enums::DocumentStatus;
use super::metering::Metering;
use crate::assessment::types::ConfidenceAlert;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Identifier of the workflow execution processing this document.
    /// Often a long ARN-like string; only its last segment scopes the cache.
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub metering: Metering,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    #[serde(default)]
    pub raw_text_uri: Option<String>,
    #[serde(default)]
    pub parsed_text_uri: Option<String>,
    /// OCR text with per-line confidence, rendered for the prompt.
    #[serde(default)]
    pub text_confidence_uri: Option<String>,
    #[serde(default)]
    pub image_uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Section {
    pub section_id: String,
    pub classification: String,
    #[serde(default)]
    pub page_ids: Vec<String>,
    #[serde(default)]
    pub extraction_result_uri: Option<String>,
    #[serde(default)]
    pub confidence_threshold_alerts: Vec<ConfidenceAlert>,
}

impl Document {
    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    pub fn section_mut(&mut self, section_id: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.section_id == section_id)
    }

    /// Pages of a section, sorted by numeric page id where possible.
    /// Unknown page ids are skipped.
    pub fn pages_for(&self, section: &Section) -> Vec<&Page> {
        let mut ids: Vec<&String> = section.page_ids.iter().collect();
        ids.sort_by(|a, b| page_order(a).cmp(&page_order(b)));
        ids.dedup();
        ids.into_iter().filter_map(|id| self.pages.get(id)).collect()
    }

    pub fn add_errors(&mut self, errors: impl IntoIterator<Item = String>) {
        self.errors.extend(errors);
    }
}

/// Numeric page ids first, in numeric order, then any others lexically.
fn page_order(id: &str) -> (u8, u64, &str) {
    match id.parse::<u64>() {
        Ok(n) => (0, n, id),
        Err(_) => (1, 0, id),
    }
}
