//! Document-class schemas and the depth-first field walker.
//!
//! Schemas are JSON-Schema-like objects. Each property is a scalar, an
//! `object` (a group, recursed into) or an `array` (a list, whose item
//! properties are kept but not walked). Per-field thresholds live under the
//! `x-confidence-threshold` extension key.

use serde_json::Value;

use super::error::AssessmentError;

pub const THRESHOLD_KEY: &str = "x-confidence-threshold";
pub const CLASS_NAME_KEY: &str = "x-document-class";
/// Nesting limit enforced while parsing.
pub const MAX_SCHEMA_DEPTH: usize = 16;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Object,
    Array,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub description: Option<String>,
    pub threshold: Option<f64>,
    /// Sub-fields of an object, or the item properties of an array of objects.
    pub properties: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSchema {
    pub class_name: String,
    pub description: Option<String>,
    pub fields: Vec<FieldSchema>,
}

/// One field yielded by [`SchemaWalker`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor<'a> {
    /// Dot-joined path from the schema root, e.g. `Address.Street`.
    pub path: String,
    pub depth: usize,
    pub field: &'a FieldSchema,
}

impl<'a> FieldDescriptor<'a> {
    /// Everything below this field: sub-fields of an object, or the item
    /// properties of a list, with paths prefixed by this field's path.
    pub fn descendants(&self) -> SchemaWalker<'a> {
        SchemaWalker {
            stack: self
                .field
                .properties
                .iter()
                .rev()
                .map(|f| (Some(self.path.clone()), self.depth + 1, f))
                .collect(),
        }
    }

    pub fn kind(&self) -> FieldKind {
        self.field.kind
    }
}

// ═══════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════

impl ClassSchema {
    /// Parse a class schema. The class name comes from `x-document-class`,
    /// then `$id`, then `title`.
    pub fn from_json(value: &Value) -> Result<Self, AssessmentError> {
        let class_name = [CLASS_NAME_KEY, "$id", "title"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| AssessmentError::InvalidSchema {
                class: "<unnamed>".into(),
                reason: format!("missing {CLASS_NAME_KEY}, $id or title"),
            })?;

        let fields = parse_properties(value, 1).map_err(|reason| AssessmentError::InvalidSchema {
            class: class_name.clone(),
            reason,
        })?;

        Ok(Self {
            class_name,
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Depth-first walk over all fields.
    pub fn walk(&self) -> SchemaWalker<'_> {
        SchemaWalker::new(self)
    }

    /// Threshold for a dot-joined path. List indices (`Items[3]`) are
    /// ignored. The outermost segment with an explicit threshold wins;
    /// `default` applies when none has one.
    pub fn resolve_threshold(&self, path: &str, default: f64) -> f64 {
        let mut fields = &self.fields;
        for segment in path.split('.') {
            let name = strip_index(segment);
            let Some(field) = fields.iter().find(|f| f.name == name) else {
                break;
            };
            if let Some(threshold) = field.threshold {
                return threshold;
            }
            fields = &field.properties;
        }
        default
    }
}

fn strip_index(segment: &str) -> &str {
    match segment.find('[') {
        Some(i) if segment.ends_with(']') => &segment[..i],
        _ => segment,
    }
}

fn parse_properties(node: &Value, depth: usize) -> Result<Vec<FieldSchema>, String> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(format!("nesting exceeds {MAX_SCHEMA_DEPTH} levels"));
    }
    let Some(props) = node.get("properties") else {
        return Ok(Vec::new());
    };
    let props = props
        .as_object()
        .ok_or_else(|| "`properties` must be an object".to_string())?;

    props
        .iter()
        .map(|(name, def)| parse_field(name, def, depth))
        .collect()
}

fn parse_field(name: &str, def: &Value, depth: usize) -> Result<FieldSchema, String> {
    let kind = field_kind(def);
    let properties = match kind {
        FieldKind::Scalar => Vec::new(),
        FieldKind::Object => parse_properties(def, depth + 1)?,
        FieldKind::Array => match def.get("items") {
            Some(items) if field_kind(items) == FieldKind::Object => {
                parse_properties(items, depth + 1)?
            }
            _ => Vec::new(),
        },
    };

    let threshold = match def.get(THRESHOLD_KEY) {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_threshold(v).ok_or_else(|| {
            format!("{name}: {THRESHOLD_KEY} must be a number between 0 and 1")
        })?),
    };

    Ok(FieldSchema {
        name: name.to_string(),
        kind,
        description: def
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        threshold,
        properties,
    })
}

fn parse_threshold(v: &Value) -> Option<f64> {
    let t = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (0.0..=1.0).contains(&t).then_some(t)
}

/// `type` may be a string or a list such as `["object", "null"]`.
fn field_kind(def: &Value) -> FieldKind {
    let has = |t: &str| match def.get("type") {
        Some(Value::String(s)) => s == t,
        Some(Value::Array(types)) => types.iter().any(|x| x.as_str() == Some(t)),
        _ => false,
    };
    if has("object") || (def.get("type").is_none() && def.get("properties").is_some()) {
        FieldKind::Object
    } else if has("array") {
        FieldKind::Array
    } else {
        FieldKind::Scalar
    }
}

// ═══════════════════════════════════════════════════════════
// Walker
// ═══════════════════════════════════════════════════════════

/// Lazy depth-first iterator. Yields object fields and then their
/// sub-fields; yields array fields without descending into items.
pub struct SchemaWalker<'a> {
    stack: Vec<(Option<String>, usize, &'a FieldSchema)>,
}

impl<'a> SchemaWalker<'a> {
    fn new(schema: &'a ClassSchema) -> Self {
        Self {
            stack: schema.fields.iter().rev().map(|f| (None, 0, f)).collect(),
        }
    }
}

impl<'a> Iterator for SchemaWalker<'a> {
    type Item = FieldDescriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (parent, depth, field) = self.stack.pop()?;
        let path = match parent {
            Some(p) => format!("{p}.{}", field.name),
            None => field.name.clone(),
        };
        if field.kind == FieldKind::Object {
            for child in field.properties.iter().rev() {
                self.stack.push((Some(path.clone()), depth + 1, child));
            }
        }
        Some(FieldDescriptor { path, depth, field })
    }
}

// ═══════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════

/// All configured class schemas, looked up case-insensitively by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    classes: Vec<ClassSchema>,
}

impl SchemaRegistry {
    pub fn from_values(values: &[Value]) -> Result<Self, AssessmentError> {
        let classes = values
            .iter()
            .map(ClassSchema::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { classes })
    }

    pub fn get(&self, class_name: &str) -> Option<&ClassSchema> {
        self.classes
            .iter()
            .find(|c| c.class_name.eq_ignore_ascii_case(class_name))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
