//! Prompt assembly.
//!
//! A section's prompt has a base part (document text, OCR confidence, page
//! images) shared by every task and a task part carrying one task's fields
//! and values. The template marks the split with `<<CACHEPOINT>>`; a cache
//! point fragment is emitted there so backends with prompt caching reuse the
//! base across tasks.

use std::sync::Arc;

use serde_json::Value;

use super::schema::{ClassSchema, FieldKind, FieldSchema};
use super::types::{AssessmentTask, TaskType};
use crate::llm::{ContentFragment, ImageFormat};
use crate::models::{Document, Section};
use crate::store::ObjectStore;

pub const CACHEPOINT_MARKER: &str = "<<CACHEPOINT>>";

const DOCUMENT_TEXT: &str = "DOCUMENT_TEXT";
const DOCUMENT_CLASS: &str = "DOCUMENT_CLASS";
const OCR_TEXT_CONFIDENCE: &str = "OCR_TEXT_CONFIDENCE";
const DOCUMENT_IMAGE: &str = "{DOCUMENT_IMAGE}";
const ATTRIBUTES: &str = "ATTRIBUTE_NAMES_AND_DESCRIPTIONS";
const EXTRACTION_RESULTS: &str = "EXTRACTION_RESULTS";

pub const DEFAULT_TASK_PROMPT: &str = r#"<background>
You are assessing data extracted from a {DOCUMENT_CLASS} document. Compare each
extracted value with the document and judge how likely it is to be correct.
</background>

<document-text>
{DOCUMENT_TEXT}
</document-text>

<ocr-text-confidence>
{OCR_TEXT_CONFIDENCE}
</ocr-text-confidence>

<document-image>
{DOCUMENT_IMAGE}
</document-image>
<<CACHEPOINT>>
<attributes>
{ATTRIBUTE_NAMES_AND_DESCRIPTIONS}
</attributes>

<extraction-results>
{EXTRACTION_RESULTS}
</extraction-results>

<instructions>
Return a JSON object keyed by attribute name, keeping the nesting of the
extraction results. Every leaf is an object with:
- "confidence": number between 0.0 and 1.0
- "confidence_reason": short explanation
- "bbox": [x1, y1, x2, y2] on a 0-1000 scale, where the value is visible
- "page": 1-based page number of the value
Respond with JSON only.
</instructions>"#;

// ═══════════════════════════════════════════════════════════
// Section context
// ═══════════════════════════════════════════════════════════

/// Everything the base prompt needs about a section.
#[derive(Debug, Clone, Default)]
pub struct SectionContext {
    pub document_class: String,
    pub document_text: String,
    pub ocr_text_confidence: String,
    pub images: Vec<(ImageFormat, Arc<[u8]>)>,
}

impl SectionContext {
    /// Read page text, OCR confidence and images for a section, in page
    /// order. Unreadable pages are logged and skipped.
    pub fn load(store: &dyn ObjectStore, document: &Document, section: &Section) -> Self {
        let mut texts = Vec::new();
        let mut confidences = Vec::new();
        let mut images: Vec<(ImageFormat, Arc<[u8]>)> = Vec::new();

        for page in document.pages_for(section) {
            if let Some(uri) = page.parsed_text_uri.as_ref().or(page.raw_text_uri.as_ref()) {
                match store.get_text(uri) {
                    Ok(text) => texts.push(text),
                    Err(e) => tracing::warn!(page = %page.page_id, error = %e, "Cannot read page text"),
                }
            }
            if let Some(uri) = &page.text_confidence_uri {
                match store.get_text(uri) {
                    Ok(text) => confidences.push(text),
                    Err(e) => tracing::warn!(page = %page.page_id, error = %e, "Cannot read OCR confidence"),
                }
            }
            if let Some(uri) = &page.image_uri {
                match store.get_bytes(uri) {
                    Ok(bytes) => match ImageFormat::detect(&bytes) {
                        Some(format) => images.push((format, Arc::from(bytes))),
                        None => tracing::warn!(page = %page.page_id, "Unrecognized page image format"),
                    },
                    Err(e) => tracing::warn!(page = %page.page_id, error = %e, "Cannot read page image"),
                }
            }
        }

        Self {
            document_class: section.classification.clone(),
            document_text: texts.join("\n\n"),
            ocr_text_confidence: confidences.join("\n"),
            images,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Assembler
// ═══════════════════════════════════════════════════════════

pub struct PromptAssembler {
    base: Vec<ContentFragment>,
    task_template: String,
    cache_point: bool,
}

impl PromptAssembler {
    /// Render the base part once for a section.
    pub fn new(template: &str, context: &SectionContext) -> Self {
        let (base_template, task_template, has_marker) = match template.split_once(CACHEPOINT_MARKER) {
            Some((base, task)) => (base, task, true),
            None => ("", template, false),
        };

        let doc_vars = [
            (DOCUMENT_TEXT, context.document_text.as_str()),
            (DOCUMENT_CLASS, context.document_class.as_str()),
            (OCR_TEXT_CONFIDENCE, context.ocr_text_confidence.as_str()),
        ];

        let mut base = Vec::new();
        let image_fragments = context.images.iter().map(|(format, bytes)| ContentFragment::Image {
            format: *format,
            bytes: Arc::clone(bytes),
        });

        match base_template.split_once(DOCUMENT_IMAGE) {
            Some((before, after)) => {
                push_text(fill(before, &doc_vars), &mut base);
                base.extend(image_fragments);
                push_text(fill(after, &doc_vars), &mut base);
            }
            None => {
                push_text(fill(base_template, &doc_vars), &mut base);
                base.extend(image_fragments);
            }
        }

        Self {
            cache_point: has_marker && !base.is_empty(),
            base,
            task_template: task_template.replace(DOCUMENT_IMAGE, ""),
        }
    }

    pub fn base(&self) -> &[ContentFragment] {
        &self.base
    }

    /// Full content for one task: the shared base, a cache point, then the
    /// task part.
    pub fn task_content(
        &self,
        task: &AssessmentTask,
        schema: &ClassSchema,
        context: &SectionContext,
    ) -> Vec<ContentFragment> {
        let attributes = describe_attributes(task, schema);
        let results = format_extraction_results(task);
        let text = fill(
            &self.task_template,
            &[
                (ATTRIBUTES, attributes.as_str()),
                (EXTRACTION_RESULTS, results.as_str()),
                (DOCUMENT_TEXT, context.document_text.as_str()),
                (DOCUMENT_CLASS, context.document_class.as_str()),
                (OCR_TEXT_CONFIDENCE, context.ocr_text_confidence.as_str()),
            ],
        );

        let mut content = Vec::with_capacity(self.base.len() + 2);
        content.extend(self.base.iter().cloned());
        if self.cache_point {
            content.push(ContentFragment::CachePoint);
        }
        content.push(ContentFragment::Text(text));
        content
    }
}

fn push_text(text: String, base: &mut Vec<ContentFragment>) {
    if !text.trim().is_empty() {
        base.push(ContentFragment::Text(text));
    }
}

/// Replace `{NAME}` placeholders in a single pass, so substituted values are
/// never re-scanned. Unknown placeholders are left as they are.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let hit = vars.iter().find(|(name, _)| {
            tail.starts_with(name) && tail[name.len()..].starts_with('}')
        });
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn describe_attributes(task: &AssessmentTask, schema: &ClassSchema) -> String {
    let mut out = String::new();
    for name in &task.attributes {
        let Some(field) = schema.field(name) else {
            continue;
        };
        match (task.task_type, task.list_item_index) {
            (TaskType::ListItem, Some(index)) => {
                out.push_str(&format!(
                    "- {} (item #{}): {}\n",
                    field.name,
                    index + 1,
                    field.description.as_deref().unwrap_or("list item")
                ));
                for child in &field.properties {
                    describe_field(child, 1, &mut out);
                }
            }
            _ => describe_field(field, 0, &mut out),
        }
    }
    out.trim_end().to_string()
}

fn describe_field(field: &FieldSchema, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let description = field.description.as_deref().unwrap_or("no description");
    match field.kind {
        FieldKind::Array => out.push_str(&format!("{pad}- {} (list): {description}\n", field.name)),
        _ => out.push_str(&format!("{pad}- {}: {description}\n", field.name)),
    }
    for child in &field.properties {
        describe_field(child, indent + 1, out);
    }
}

fn format_extraction_results(task: &AssessmentTask) -> String {
    match (task.task_type, task.list_item_index, task.primary_attribute()) {
        (TaskType::ListItem, Some(index), Some(name)) => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert(name.to_string(), task.extraction_data.clone());
            format!("Item #{} of {name}:\n{:#}", index + 1, Value::Object(wrapped))
        }
        _ => format!("{:#}", task.extraction_data),
    }
}
