//! Per-target payload schemas: declarative descriptors, validation, and
//! mechanically derived capability hints.
//!
//! Each generation target registers exactly one [`TargetSchema`]. The
//! validator and the capability-hint text shown to the reasoning service
//! are both derived from the same descriptor, so a schema change
//! propagates to both automatically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Structured requests
// ---------------------------------------------------------------------------

/// A validated (or to-be-validated) payload for one generation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRequest {
    /// Target identifier, e.g. `"veo"`.
    pub target: String,
    /// Payload fields, shaped per the target's schema.
    pub fields: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Field descriptors
// ---------------------------------------------------------------------------

/// Shape and constraints of one payload field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Free text. `tag_bearing` fields may carry resource-reference tags.
    Text { tag_bearing: bool },
    /// A media input, supplied as a locator string (or tag) and resolved
    /// to a `{uri, mime_type}` object during restoration.
    MediaObject,
    /// Integer within an inclusive range.
    Integer {
        min: i64,
        max: i64,
        default: Option<i64>,
    },
    /// Boolean flag.
    Boolean,
    /// One of a fixed set of string literals.
    Choice {
        values: &'static [&'static str],
        default: Option<&'static str>,
    },
}

/// One field of a target's payload.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

/// Immutable descriptor of one target's payload shape.
#[derive(Debug, Clone)]
pub struct TargetSchema {
    pub target: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl TargetSchema {
    fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of fields that resolve to `{uri, mime_type}` media objects.
    pub fn media_object_paths(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::MediaObject))
            .map(|f| f.name.to_string())
            .collect()
    }

    /// One-target capability hint, rendered mechanically from the
    /// descriptor. Never hand-written: field lists, enum domains, and
    /// bounds always reflect the schema as registered.
    pub fn capability_hint(&self) -> String {
        let mut out = format!("Target \"{}\": {}\n", self.target, self.description);
        for field in &self.fields {
            let requirement = if field.required { "required" } else { "optional" };
            let shape = match &field.kind {
                FieldKind::Text { tag_bearing: true } => {
                    "string, may contain media tags".to_string()
                }
                FieldKind::Text { tag_bearing: false } => "string".to_string(),
                FieldKind::MediaObject => "media tag or gs:// locator".to_string(),
                FieldKind::Integer { min, max, default } => match default {
                    Some(d) => format!("integer {min}..{max}, default {d}"),
                    None => format!("integer {min}..{max}"),
                },
                FieldKind::Boolean => "boolean".to_string(),
                FieldKind::Choice { values, default } => match default {
                    Some(d) => format!("one of {}, default {d}", values.join("|")),
                    None => format!("one of {}", values.join("|")),
                },
            };
            out.push_str(&format!(
                "  - {} ({shape}; {requirement}): {}\n",
                field.name, field.description
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// One field-level schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// Field path within the payload, e.g. `"duration_seconds"`.
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Registry lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// All registered target schemas, keyed by target identifier.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, TargetSchema>,
}

impl SchemaRegistry {
    /// Registry of the built-in generation targets.
    pub fn builtin() -> Self {
        let mut schemas = BTreeMap::new();
        for schema in [veo_schema(), imagen_schema(), lyria_schema()] {
            schemas.insert(schema.target, schema);
        }
        Self { schemas }
    }

    pub fn lookup(&self, target: &str) -> Result<&TargetSchema, SchemaError> {
        self.schemas
            .get(target)
            .ok_or_else(|| SchemaError::UnknownTarget(target.to_string()))
    }

    /// Registered target identifiers, in stable order.
    pub fn targets(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }

    /// Capability hints for every registered target, concatenated for the
    /// exploratory reasoning pass.
    pub fn capability_hints(&self) -> String {
        self.schemas
            .values()
            .map(TargetSchema::capability_hint)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Validate payload fields against one target's schema.
    ///
    /// On success returns the normalized payload: defaults filled in for
    /// absent optional fields that declare one. On failure returns every
    /// violation found, not just the first.
    pub fn validate(
        &self,
        target: &str,
        fields: &serde_json::Value,
    ) -> Result<serde_json::Value, Vec<SchemaViolation>> {
        let schema = match self.lookup(target) {
            Ok(schema) => schema,
            Err(SchemaError::UnknownTarget(t)) => {
                return Err(vec![SchemaViolation::new(
                    "target",
                    format!("unknown target \"{t}\""),
                )])
            }
        };
        validate_fields(schema, fields)
    }
}

fn validate_fields(
    schema: &TargetSchema,
    fields: &serde_json::Value,
) -> Result<serde_json::Value, Vec<SchemaViolation>> {
    let Some(map) = fields.as_object() else {
        return Err(vec![SchemaViolation::new(
            "",
            "payload must be a JSON object",
        )]);
    };

    let mut violations = Vec::new();
    let mut normalized = serde_json::Map::new();

    for (key, value) in map {
        match schema.field(key) {
            None => violations.push(SchemaViolation::new(
                key.clone(),
                format!("unknown field for target \"{}\"", schema.target),
            )),
            Some(spec) => {
                if let Err(violation) = check_value(spec, value) {
                    violations.push(violation);
                } else {
                    normalized.insert(key.clone(), value.clone());
                }
            }
        }
    }

    for spec in &schema.fields {
        if map.contains_key(spec.name) {
            continue;
        }
        if spec.required {
            violations.push(SchemaViolation::new(spec.name, "required field is missing"));
            continue;
        }
        match &spec.kind {
            FieldKind::Integer {
                default: Some(d), ..
            } => {
                normalized.insert(spec.name.to_string(), serde_json::json!(d));
            }
            FieldKind::Choice {
                default: Some(d), ..
            } => {
                normalized.insert(spec.name.to_string(), serde_json::json!(d));
            }
            _ => {}
        }
    }

    if violations.is_empty() {
        Ok(serde_json::Value::Object(normalized))
    } else {
        Err(violations)
    }
}

fn check_value(spec: &FieldSpec, value: &serde_json::Value) -> Result<(), SchemaViolation> {
    match &spec.kind {
        FieldKind::Text { .. } => {
            if !value.is_string() {
                return Err(SchemaViolation::new(spec.name, "expected a string"));
            }
        }
        FieldKind::MediaObject => {
            // Accepted either unresolved (tag / locator string) or
            // resolved ({uri, mime_type} object).
            let ok = value.is_string()
                || value
                    .as_object()
                    .is_some_and(|o| o.get("uri").is_some_and(|u| u.is_string()));
            if !ok {
                return Err(SchemaViolation::new(
                    spec.name,
                    "expected a media tag, a gs:// locator, or a {uri, mime_type} object",
                ));
            }
        }
        FieldKind::Integer { min, max, .. } => match value.as_i64() {
            None => {
                return Err(SchemaViolation::new(spec.name, "expected an integer"));
            }
            Some(n) if n < *min || n > *max => {
                return Err(SchemaViolation::new(
                    spec.name,
                    format!("must be between {min} and {max} (got {n})"),
                ));
            }
            Some(_) => {}
        },
        FieldKind::Boolean => {
            if !value.is_boolean() {
                return Err(SchemaViolation::new(spec.name, "expected a boolean"));
            }
        }
        FieldKind::Choice { values, .. } => match value.as_str() {
            None => {
                return Err(SchemaViolation::new(spec.name, "expected a string"));
            }
            Some(s) if !values.contains(&s) => {
                return Err(SchemaViolation::new(
                    spec.name,
                    format!("must be one of {} (got \"{s}\")", values.join("|")),
                ));
            }
            Some(_) => {}
        },
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Built-in targets
// ---------------------------------------------------------------------------

fn veo_schema() -> TargetSchema {
    TargetSchema {
        target: "veo",
        description: "Video generation from a text prompt, optionally seeded by a still image. \
                      Runs as a long-running operation.",
        fields: vec![
            FieldSpec {
                name: "prompt",
                kind: FieldKind::Text { tag_bearing: true },
                required: true,
                description: "what the video should show",
            },
            FieldSpec {
                name: "image",
                kind: FieldKind::MediaObject,
                required: false,
                description: "still image to animate",
            },
            FieldSpec {
                name: "duration_seconds",
                kind: FieldKind::Integer {
                    min: 4,
                    max: 8,
                    default: Some(8),
                },
                required: false,
                description: "clip length in seconds",
            },
            FieldSpec {
                name: "aspect_ratio",
                kind: FieldKind::Choice {
                    values: &["16:9", "9:16"],
                    default: Some("16:9"),
                },
                required: false,
                description: "output aspect ratio",
            },
            FieldSpec {
                name: "resolution",
                kind: FieldKind::Choice {
                    values: &["720p", "1080p"],
                    default: Some("720p"),
                },
                required: false,
                description: "output resolution",
            },
            FieldSpec {
                name: "sample_count",
                kind: FieldKind::Integer {
                    min: 1,
                    max: 4,
                    default: Some(1),
                },
                required: false,
                description: "number of clips to generate",
            },
            FieldSpec {
                name: "negative_prompt",
                kind: FieldKind::Text { tag_bearing: false },
                required: false,
                description: "what to avoid",
            },
        ],
    }
}

fn imagen_schema() -> TargetSchema {
    TargetSchema {
        target: "imagen",
        description: "Still-image generation from a text prompt. Completes synchronously.",
        fields: vec![
            FieldSpec {
                name: "prompt",
                kind: FieldKind::Text { tag_bearing: true },
                required: true,
                description: "what the image should show",
            },
            FieldSpec {
                name: "sample_count",
                kind: FieldKind::Integer {
                    min: 1,
                    max: 4,
                    default: Some(1),
                },
                required: false,
                description: "number of images to generate",
            },
            FieldSpec {
                name: "aspect_ratio",
                kind: FieldKind::Choice {
                    values: &["1:1", "3:4", "4:3", "16:9", "9:16"],
                    default: Some("1:1"),
                },
                required: false,
                description: "output aspect ratio",
            },
            FieldSpec {
                name: "negative_prompt",
                kind: FieldKind::Text { tag_bearing: false },
                required: false,
                description: "what to avoid",
            },
        ],
    }
}

fn lyria_schema() -> TargetSchema {
    TargetSchema {
        target: "lyria",
        description: "Instrumental music generation from a text prompt. Completes synchronously.",
        fields: vec![
            FieldSpec {
                name: "prompt",
                kind: FieldKind::Text { tag_bearing: true },
                required: true,
                description: "style, mood, and instrumentation",
            },
            FieldSpec {
                name: "negative_prompt",
                kind: FieldKind::Text { tag_bearing: false },
                required: false,
                description: "styles or instruments to avoid",
            },
            FieldSpec {
                name: "sample_count",
                kind: FieldKind::Integer {
                    min: 1,
                    max: 2,
                    default: Some(1),
                },
                required: false,
                description: "number of pieces to generate",
            },
            FieldSpec {
                name: "seed",
                kind: FieldKind::Integer {
                    min: 0,
                    max: i64::MAX,
                    default: None,
                },
                required: false,
                description: "sampling seed for reproducible output",
            },
        ],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
