//! Converts `bbox` + `page` hints from the model into bounding-box geometry.
//!
//! The model reports boxes as `[x1, y1, x2, y2]` on a 0-1000 scale. They are
//! rewritten as `geometry: {boundingBox: {top, left, width, height}, page}`
//! on a 0-1 scale. A leaf with only one of the two hints loses both.

use serde_json::{json, Map, Value};

use super::types::is_leaf_assessment;

const BBOX_SCALE: f64 = 1000.0;

/// Normalize every leaf assessment under `value`, at any depth.
pub fn normalize_geometry(value: &mut Value) {
    let leaf = is_leaf_assessment(value);
    match value {
        Value::Object(obj) if leaf => normalize_leaf(obj),
        Value::Object(obj) => {
            drop_stray_hints(obj);
            obj.values_mut().for_each(normalize_geometry);
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_geometry),
        _ => {}
    }
}

/// A `bbox` or `page` on a group is a hint the model attached at the wrong
/// level. Sub-fields that happen to carry those names are objects (or lists
/// of objects) and are kept.
fn drop_stray_hints(obj: &mut Map<String, Value>) {
    for key in ["bbox", "page"] {
        let stray = match obj.get(key) {
            None | Some(Value::Object(_)) => false,
            Some(Value::Array(items)) => !items.iter().all(Value::is_object),
            Some(_) => true,
        };
        if stray {
            tracing::debug!(key, "Dropping geometry hint outside a leaf assessment");
            obj.remove(key);
        }
    }
}

fn normalize_leaf(leaf: &mut Map<String, Value>) {
    let bbox = leaf.remove("bbox");
    let page = leaf.remove("page");

    match (bbox, page) {
        (None, None) => {}
        (Some(bbox), Some(page)) => match (parse_bbox(&bbox), parse_page(&page)) {
            (Some(coords), Some(page)) => {
                leaf.insert("geometry".into(), to_geometry(coords, page));
            }
            _ => {
                tracing::warn!(bbox = %bbox, page = %page, "Dropping malformed geometry hint");
            }
        },
        _ => {
            tracing::debug!("Dropping incomplete geometry hint");
        }
    }
}

fn parse_bbox(value: &Value) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut coords = [0.0; 4];
    for (slot, item) in coords.iter_mut().zip(items) {
        let n = match item {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        if !n.is_finite() {
            return None;
        }
        *slot = n;
    }
    Some(coords)
}

fn parse_page(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_geometry([x1, y1, x2, y2]: [f64; 4], page: u64) -> Value {
    let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
    let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
    json!({
        "boundingBox": {
            "top": top / BBOX_SCALE,
            "left": left / BBOX_SCALE,
            "width": (right - left) / BBOX_SCALE,
            "height": (bottom - top) / BBOX_SCALE,
        },
        "page": page,
    })
}
