//! Reassembles task results into the section's nested assessment.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use super::types::{leaf_confidence, AssessmentResult, AssessmentTask, ConfidenceAlert, TaskType};
use crate::models::Metering;

/// Merged output of a section run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// Ordered like the extraction result's fields.
    pub assessment: Map<String, Value>,
    pub alerts: Vec<ConfidenceAlert>,
    /// Usage of results produced in this run. Cached results were metered
    /// when they first ran.
    pub metering: Metering,
}

/// Merge `results` back into the shape of `extraction`.
///
/// Results are matched to tasks by id, so completion order does not matter.
/// Missing or failed results leave their fields absent; list items are
/// placed at their index with `{}` filling any gap.
pub fn aggregate(
    tasks: &[AssessmentTask],
    results: &[AssessmentResult],
    extraction: &Map<String, Value>,
    default_threshold: f64,
) -> Aggregation {
    let by_id: HashMap<&str, &AssessmentResult> =
        results.iter().map(|r| (r.task_id.as_str(), r)).collect();

    let mut fields: HashMap<String, Value> = HashMap::new();
    let mut lists: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut list_lengths: HashMap<&str, usize> = HashMap::new();
    let mut alerts = Vec::new();
    let mut metering = Metering::new();

    for task in tasks {
        if let (TaskType::ListItem, Some(index), Some(name)) =
            (task.task_type, task.list_item_index, task.primary_attribute())
        {
            let len = list_lengths.entry(name).or_insert(0);
            *len = (*len).max(index + 1);
        }
    }

    for task in tasks {
        let Some(result) = by_id.get(task.task_id.as_str()) else {
            tracing::debug!(task_id = %task.task_id, "No result for task");
            continue;
        };
        if !result.from_cache {
            if let Some(m) = &result.metering {
                metering.merge(m);
            }
        }
        if !result.success {
            continue;
        }

        let mut data = result.assessment_data.clone();
        alerts.extend(annotate_task(task, &mut data, default_threshold));

        match (task.task_type, task.list_item_index, task.primary_attribute()) {
            (TaskType::ListItem, Some(index), Some(name)) => {
                let Some(item) = data.remove(name) else {
                    continue;
                };
                let len = list_lengths.get(name).copied().unwrap_or(index + 1);
                let slots = lists
                    .entry(name.to_string())
                    .or_insert_with(|| vec![Value::Object(Map::new()); len]);
                if slots.len() <= index {
                    slots.resize(index + 1, Value::Object(Map::new()));
                }
                slots[index] = item;
            }
            _ => {
                for name in &task.attributes {
                    if let Some(value) = data.remove(name) {
                        fields.insert(name.clone(), value);
                    }
                }
            }
        }
    }

    let mut assessment = Map::new();
    for key in extraction.keys() {
        if let Some(value) = fields.remove(key) {
            assessment.insert(key.clone(), value);
        } else if let Some(items) = lists.remove(key) {
            assessment.insert(key.clone(), Value::Array(items));
        }
    }

    Aggregation {
        assessment,
        alerts,
        metering,
    }
}

/// Attach `confidence_threshold` to every leaf of one task's assessment and
/// return the leaves below threshold, with fully qualified names.
pub fn annotate_task(
    task: &AssessmentTask,
    data: &mut Map<String, Value>,
    default_threshold: f64,
) -> Vec<ConfidenceAlert> {
    let mut alerts = Vec::new();
    let thresholds = &task.confidence_thresholds;

    match (task.task_type, task.list_item_index, task.primary_attribute()) {
        (TaskType::ListItem, Some(index), Some(name)) => {
            if let Some(item) = data.get_mut(name) {
                let qualified = format!("{name}[{index}]");
                annotate(item, name, &qualified, thresholds, default_threshold, &mut alerts);
            }
        }
        _ => {
            for (name, value) in data.iter_mut() {
                annotate(value, name, name, thresholds, default_threshold, &mut alerts);
            }
        }
    }
    alerts
}

/// `schema_path` omits list indices and selects the threshold;
/// `qualified` includes them and names the alert.
fn annotate(
    value: &mut Value,
    schema_path: &str,
    qualified: &str,
    thresholds: &BTreeMap<String, f64>,
    default_threshold: f64,
    alerts: &mut Vec<ConfidenceAlert>,
) {
    match value {
        Value::Object(obj) if obj.contains_key("confidence") => {
            let threshold = lookup_threshold(thresholds, schema_path, default_threshold);
            obj.insert("confidence_threshold".into(), Value::from(threshold));
            if let Some(confidence) = leaf_confidence(obj) {
                if confidence < threshold {
                    alerts.push(ConfidenceAlert {
                        attribute_name: qualified.to_string(),
                        confidence,
                        confidence_threshold: threshold,
                    });
                }
            }
        }
        Value::Object(obj) => {
            for (key, child) in obj.iter_mut() {
                annotate(
                    child,
                    &format!("{schema_path}.{key}"),
                    &format!("{qualified}.{key}"),
                    thresholds,
                    default_threshold,
                    alerts,
                );
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                annotate(
                    item,
                    schema_path,
                    &format!("{qualified}[{i}]"),
                    thresholds,
                    default_threshold,
                    alerts,
                );
            }
        }
        _ => {}
    }
}

/// Exact path first, then each ancestor, then the default.
fn lookup_threshold(thresholds: &BTreeMap<String, f64>, path: &str, default: f64) -> f64 {
    let mut path = path;
    loop {
        if let Some(t) = thresholds.get(path) {
            return *t;
        }
        match path.rsplit_once('.') {
            Some((parent, _)) => path = parent,
            None => return default,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::assessment::types::TaskFailure;
    use crate::models::TokenUsage;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn task(task_id: &str, task_type: TaskType, attrs: &[&str], index: Option<usize>) -> AssessmentTask {
        AssessmentTask {
            task_id: task_id.into(),
            task_type,
            attributes: attrs.iter().map(|s| s.to_string()).collect(),
            extraction_data: Value::Null,
            confidence_thresholds: BTreeMap::new(),
            list_item_index: index,
        }
    }

    #[test]
    fn alert_raised_only_below_threshold() {
        let mut t = task("simple_batch_0", TaskType::SimpleBatch, &["Low", "High"], None);
        t.confidence_thresholds.insert("Low".into(), 0.9);
        t.confidence_thresholds.insert("High".into(), 0.9);
        let result = AssessmentResult::succeeded(
            "simple_batch_0",
            obj(json!({
                "Low": {"confidence": 0.5, "confidence_reason": "blurry"},
                "High": {"confidence": 0.95, "confidence_reason": "clear"}
            })),
        );
        let extraction = obj(json!({"Low": "x", "High": "y"}));

        let agg = aggregate(&[t], &[result], &extraction, 0.9);
        assert_eq!(
            agg.alerts,
            vec![ConfidenceAlert {
                attribute_name: "Low".into(),
                confidence: 0.5,
                confidence_threshold: 0.9,
            }]
        );
        assert_eq!(agg.assessment["High"]["confidence_threshold"], 0.9);
    }

    #[test]
    fn list_gap_keeps_placeholder() {
        let tasks: Vec<AssessmentTask> = (0..3)
            .map(|i| task(&format!("list_Items_item_{i}"), TaskType::ListItem, &["Items"], Some(i)))
            .collect();
        let item = |c: f64| obj(json!({"Items": {"Amount": {"confidence": c}}}));
        let results = vec![
            AssessmentResult::succeeded("list_Items_item_2", item(0.8)),
            AssessmentResult::failed("list_Items_item_1", TaskFailure::Parse("bad".into()), "bad".into()),
            AssessmentResult::succeeded("list_Items_item_0", item(0.99)),
        ];
        let extraction = obj(json!({"Items": [{}, {}, {}]}));

        let agg = aggregate(&tasks, &results, &extraction, 0.9);
        let items = agg.assessment["Items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], json!({}));
        assert_eq!(items[0]["Amount"]["confidence"], 0.99);
        assert_eq!(items[2]["Amount"]["confidence"], 0.8);
        assert_eq!(agg.alerts.len(), 1);
        assert_eq!(agg.alerts[0].attribute_name, "Items[2].Amount");
    }

    #[test]
    fn trailing_failed_item_still_padded() {
        let tasks: Vec<AssessmentTask> = (0..2)
            .map(|i| task(&format!("list_Items_item_{i}"), TaskType::ListItem, &["Items"], Some(i)))
            .collect();
        let results = vec![AssessmentResult::succeeded(
            "list_Items_item_0",
            obj(json!({"Items": {"Amount": {"confidence": 1.0}}})),
        )];
        let agg = aggregate(&tasks, &results, &obj(json!({"Items": [1, 2]})), 0.9);
        assert_eq!(agg.assessment["Items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn group_thresholds_use_nearest_path() {
        let mut t = task("group_Vendor", TaskType::Group, &["Vendor"], None);
        t.confidence_thresholds.insert("Vendor".into(), 0.6);
        t.confidence_thresholds.insert("Vendor.City".into(), 0.99);
        let result = AssessmentResult::succeeded(
            "group_Vendor",
            obj(json!({"Vendor": {
                "Name": {"confidence": 0.7},
                "City": {"confidence": 0.9},
                "Address": {"Street": {"confidence": 0.5}}
            }})),
        );
        let agg = aggregate(&[t], &[result], &obj(json!({"Vendor": {}})), 0.9);

        let vendor = &agg.assessment["Vendor"];
        assert_eq!(vendor["Name"]["confidence_threshold"], 0.6);
        assert_eq!(vendor["City"]["confidence_threshold"], 0.99);
        assert_eq!(vendor["Address"]["Street"]["confidence_threshold"], 0.6);
        let names: Vec<&str> = agg.alerts.iter().map(|a| a.attribute_name.as_str()).collect();
        assert_eq!(names, vec!["Vendor.City", "Vendor.Address.Street"]);
    }

    #[test]
    fn output_follows_extraction_order_and_skips_failures() {
        let tasks = vec![
            task("simple_batch_0", TaskType::SimpleBatch, &["B"], None),
            task("simple_batch_1", TaskType::SimpleBatch, &["A"], None),
            task("group_G", TaskType::Group, &["G"], None),
        ];
        let results = vec![
            AssessmentResult::succeeded("simple_batch_0", obj(json!({"B": {"confidence": 1.0}}))),
            AssessmentResult::succeeded("simple_batch_1", obj(json!({"A": {"confidence": 1.0}}))),
            AssessmentResult::failed("group_G", TaskFailure::Parse("x".into()), "x".into()),
        ];
        let agg = aggregate(&tasks, &results, &obj(json!({"A": 1, "G": {}, "B": 2})), 0.9);
        let keys: Vec<&str> = agg.assessment.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn cached_metering_not_counted_again() {
        let tasks = vec![
            task("simple_batch_0", TaskType::SimpleBatch, &["A"], None),
            task("simple_batch_1", TaskType::SimpleBatch, &["B"], None),
        ];
        let mut fresh = AssessmentResult::succeeded("simple_batch_0", obj(json!({"A": {"confidence": 1}})));
        fresh.metering = Some(Metering::single("k", TokenUsage::new(10, 5)));
        let mut cached = AssessmentResult::succeeded("simple_batch_1", obj(json!({"B": {"confidence": 1}})));
        cached.metering = Some(Metering::single("k", TokenUsage::new(100, 50)));
        cached.from_cache = true;

        let agg = aggregate(&tasks, &[fresh, cached], &obj(json!({"A": 1, "B": 2})), 0.9);
        assert_eq!(agg.metering.total_tokens(), 15);
        assert_eq!(agg.assessment.len(), 2);
    }

    #[test]
    fn failed_results_still_metered() {
        let tasks = vec![task("group_G", TaskType::Group, &["G"], None)];
        let mut failed = AssessmentResult::failed("group_G", TaskFailure::Parse("x".into()), "x".into());
        failed.metering = Some(Metering::single("k", TokenUsage::new(3, 4)));
        let agg = aggregate(&tasks, &[failed], &obj(json!({"G": {}})), 0.9);
        assert_eq!(agg.metering.total_tokens(), 7);
        assert!(agg.assessment.is_empty());
    }
}
