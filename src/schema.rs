//! Declarative input schemas for bridge tools.
//!
//! Each tool declares its accepted fields as a static `FieldSpec` table.
//! Validation runs before any engine process is spawned, so the engine is
//! never invoked with arguments that fail the declared schema.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Semantic type of a tool argument field.
///
/// Covers the value shapes the ExprPredictor tools accept. `Sequence` is a
/// generic array (binding sites, indicator vectors); `NumberSequence`
/// additionally requires every element to be numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Number,
    Integer,
    String,
    Boolean,
    NumberSequence,
    Sequence,
    Object,
}

impl FieldType {
    /// JSON Schema type name for serialized schemas.
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::NumberSequence | FieldType::Sequence => "array",
            FieldType::Object => "object",
        }
    }

    /// Check a single value against this type.
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Sequence => value.is_array(),
            FieldType::NumberSequence => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_number)),
            FieldType::Object => value.is_object(),
        }
    }
}

/// A single field in a tool's input schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    /// For sequence types: reject empty arrays.
    pub non_empty: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            non_empty: false,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            non_empty: false,
        }
    }

    /// Require the sequence value to be non-empty.
    pub const fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }
}

/// Argument validation failure.
///
/// Produced before process invocation; the dispatch layer surfaces these
/// as `InvalidArgument` envelopes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    /// A required field is absent from the argument mapping.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has the wrong JSON type.
    #[error("field '{field}' must be of type {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    /// A sequence field declared non-empty is empty.
    #[error("field '{0}' must be a non-empty sequence")]
    EmptySequence(&'static str),
}

/// Validate an argument mapping against a field table.
///
/// Unknown extra fields are ignored for forward compatibility; the engine
/// only reads the fields it knows about.
pub fn validate_arguments(
    fields: &[FieldSpec],
    arguments: &Map<String, Value>,
) -> Result<(), ArgumentError> {
    for spec in fields {
        let value = match arguments.get(spec.name) {
            Some(v) => v,
            None if spec.required => return Err(ArgumentError::MissingField(spec.name)),
            None => continue,
        };

        // Null on an optional field is treated as absent.
        if value.is_null() && !spec.required {
            continue;
        }

        if !spec.ty.accepts(value) {
            return Err(ArgumentError::WrongType {
                field: spec.name,
                expected: match spec.ty {
                    FieldType::NumberSequence => "array of numbers",
                    other => other.json_type(),
                },
            });
        }

        if spec.non_empty {
            if let Some(items) = value.as_array() {
                if items.is_empty() {
                    return Err(ArgumentError::EmptySequence(spec.name));
                }
            }
        }
    }

    Ok(())
}

/// Serialized form of a field table, shaped like a JSON Schema object.
///
/// This is what `getSchema` returns to clients.
#[derive(Debug, Clone, Serialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: &'static str,
    pub properties: Map<String, Value>,
    pub required: Vec<&'static str>,
}

impl InputSchema {
    /// Build the serialized schema from a static field table.
    pub fn from_fields(fields: &[FieldSpec]) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for spec in fields {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(spec.ty.json_type().into()));
            if spec.ty == FieldType::NumberSequence {
                prop.insert(
                    "items".into(),
                    serde_json::json!({ "type": "number" }),
                );
            }
            if spec.non_empty {
                prop.insert("minItems".into(), Value::from(1));
            }
            properties.insert(spec.name.to_string(), Value::Object(prop));

            if spec.required {
                required.push(spec.name);
            }
        }

        Self {
            schema_type: "object",
            properties,
            required,
        }
    }
}
