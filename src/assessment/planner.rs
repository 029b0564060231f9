//! Splits a section's extracted values into independently assessable tasks.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::schema::{ClassSchema, FieldDescriptor, FieldKind};
use super::types::{AssessmentTask, TaskType};

/// Plan tasks for `extraction`.
///
/// Scalars are chunked into `simple_batch_size` batches, each object field
/// becomes one group task and each list item its own task. `list_batch_size`
/// only sets the stride of the outer loop over items. Fields missing from
/// either the schema or the extraction are skipped. Task order follows
/// schema order and is stable.
pub fn plan(
    extraction: &Map<String, Value>,
    schema: &ClassSchema,
    default_threshold: f64,
    simple_batch_size: usize,
    list_batch_size: usize,
) -> Vec<AssessmentTask> {
    let simple_batch_size = simple_batch_size.max(1);
    let list_batch_size = list_batch_size.max(1);

    let mut scalars: Vec<(FieldDescriptor<'_>, &Value)> = Vec::new();
    let mut groups: Vec<(FieldDescriptor<'_>, &Value)> = Vec::new();
    let mut lists: Vec<(FieldDescriptor<'_>, &[Value])> = Vec::new();

    for descriptor in schema.walk().filter(|d| d.depth == 0) {
        let Some(value) = extraction.get(&descriptor.path) else {
            continue;
        };
        match (descriptor.kind(), value) {
            (FieldKind::Object, _) => groups.push((descriptor, value)),
            (FieldKind::Array, Value::Array(items)) => lists.push((descriptor, items.as_slice())),
            // A list field holding a non-list value (usually null) is still
            // assessed, as a plain value.
            (FieldKind::Array, _) | (FieldKind::Scalar, _) => scalars.push((descriptor, value)),
        }
    }

    let mut tasks = Vec::new();

    for (batch_no, chunk) in scalars.chunks(simple_batch_size).enumerate() {
        let mut data = Map::new();
        let mut thresholds = BTreeMap::new();
        for (descriptor, value) in chunk {
            data.insert(descriptor.path.clone(), (*value).clone());
            thresholds.insert(
                descriptor.path.clone(),
                schema.resolve_threshold(&descriptor.path, default_threshold),
            );
        }
        tasks.push(AssessmentTask {
            task_id: format!("simple_batch_{batch_no}"),
            task_type: TaskType::SimpleBatch,
            attributes: chunk.iter().map(|(d, _)| d.path.clone()).collect(),
            extraction_data: Value::Object(data),
            confidence_thresholds: thresholds,
            list_item_index: None,
        });
    }

    for (descriptor, value) in groups {
        let mut data = Map::new();
        data.insert(descriptor.path.clone(), value.clone());
        tasks.push(AssessmentTask {
            task_id: format!("group_{}", descriptor.path),
            task_type: TaskType::Group,
            attributes: vec![descriptor.path.clone()],
            extraction_data: Value::Object(data),
            confidence_thresholds: nested_thresholds(schema, &descriptor, default_threshold),
            list_item_index: None,
        });
    }

    for (descriptor, items) in lists {
        let thresholds = nested_thresholds(schema, &descriptor, default_threshold);
        for start in (0..items.len()).step_by(list_batch_size) {
            let end = (start + list_batch_size).min(items.len());
            for (offset, item) in items[start..end].iter().enumerate() {
                let index = start + offset;
                tasks.push(AssessmentTask {
                    task_id: format!("list_{}_item_{index}", descriptor.path),
                    task_type: TaskType::ListItem,
                    attributes: vec![descriptor.path.clone()],
                    extraction_data: item.clone(),
                    confidence_thresholds: thresholds.clone(),
                    list_item_index: Some(index),
                });
            }
        }
    }

    tracing::debug!(
        tasks = tasks.len(),
        class = %schema.class_name,
        "Planned assessment tasks"
    );
    tasks
}

/// Thresholds for a field and every path the walker finds below it.
fn nested_thresholds(
    schema: &ClassSchema,
    descriptor: &FieldDescriptor<'_>,
    default_threshold: f64,
) -> BTreeMap<String, f64> {
    std::iter::once(descriptor.path.clone())
        .chain(descriptor.descendants().map(|d| d.path))
        .map(|path| {
            let threshold = schema.resolve_threshold(&path, default_threshold);
            (path, threshold)
        })
        .collect()
}
