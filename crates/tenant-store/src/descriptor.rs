//! Transmission-safe schema descriptors for the control plane.
//!
//! A descriptor rehydrates to the same [`FieldSchema`] it came from, so mapping
//! a descriptor yields the column the compiler would produce directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mapper::{ColumnDefinition, map_field};
use crate::schema::{
    DeferredDefault, DefaultValue, FieldKind, FieldSchema, NumberConstraints, StringConstraints,
    StringFormat, TableSchema,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: KindDescriptor,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub has_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindDescriptor {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Number {
        #[serde(default)]
        integer: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Boolean,
    Date,
    Object {
        shape: Vec<FieldDescriptor>,
    },
    Array {
        element: Box<FieldDescriptor>,
    },
    Record {
        value: Box<FieldDescriptor>,
    },
    Enum {
        values: Vec<String>,
    },
    Literal {
        value: Value,
    },
    /// Any kind this build does not know about.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultDescriptor {
    Value { value: Value },
    Deferred { producer: DeferredProducer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredProducer {
    Now,
}

/// Serializes a table schema, preserving field order and nesting.
#[must_use]
pub fn serialize(schema: &TableSchema) -> TableDescriptor {
    TableDescriptor {
        fields: schema.fields().iter().map(serialize_field).collect(),
    }
}

#[must_use]
pub fn serialize_field(field: &FieldSchema) -> FieldDescriptor {
    FieldDescriptor {
        name: field.name.clone(),
        kind: serialize_kind(&field.kind),
        optional: field.optional,
        nullable: field.nullable,
        has_default: field.has_default(),
        default: field.default.as_ref().map(|default| match default {
            DefaultValue::Literal(value) => DefaultDescriptor::Value {
                value: value.clone(),
            },
            DefaultValue::Deferred(DeferredDefault::Now) => DefaultDescriptor::Deferred {
                producer: DeferredProducer::Now,
            },
        }),
    }
}

fn serialize_kind(kind: &FieldKind) -> KindDescriptor {
    match kind {
        FieldKind::String(constraints) => KindDescriptor::String {
            min_length: constraints.min_length,
            max_length: constraints.max_length,
            format: constraints.format.map(|format| format.as_str().to_string()),
        },
        FieldKind::Number(constraints) => KindDescriptor::Number {
            integer: constraints.integer,
            min: constraints.min,
            max: constraints.max,
        },
        FieldKind::Boolean => KindDescriptor::Boolean,
        FieldKind::Date => KindDescriptor::Date,
        FieldKind::Object(fields) => KindDescriptor::Object {
            shape: fields.iter().map(serialize_field).collect(),
        },
        FieldKind::Array(element) => KindDescriptor::Array {
            element: Box::new(serialize_field(element)),
        },
        FieldKind::Record(value) => KindDescriptor::Record {
            value: Box::new(serialize_field(value)),
        },
        FieldKind::Enum(values) => KindDescriptor::Enum {
            values: values.clone(),
        },
        FieldKind::Literal(value) => KindDescriptor::Literal {
            value: value.clone(),
        },
    }
}

/// Rebuilds the field schema. `None` when the descriptor, or anything nested
/// in it, carries a kind or format this build does not recognize.
#[must_use]
pub fn rehydrate(descriptor: &FieldDescriptor) -> Option<FieldSchema> {
    let kind = match &descriptor.kind {
        KindDescriptor::String {
            min_length,
            max_length,
            format,
        } => {
            let format = match format {
                Some(raw) => Some(StringFormat::parse(raw)?),
                None => None,
            };
            FieldKind::String(StringConstraints {
                min_length: *min_length,
                max_length: *max_length,
                format,
            })
        }
        KindDescriptor::Number { integer, min, max } => FieldKind::Number(NumberConstraints {
            integer: *integer,
            min: *min,
            max: *max,
        }),
        KindDescriptor::Boolean => FieldKind::Boolean,
        KindDescriptor::Date => FieldKind::Date,
        KindDescriptor::Object { shape } => {
            FieldKind::Object(shape.iter().map(rehydrate).collect::<Option<Vec<_>>>()?)
        }
        KindDescriptor::Array { element } => FieldKind::Array(Box::new(rehydrate(element)?)),
        KindDescriptor::Record { value } => FieldKind::Record(Box::new(rehydrate(value)?)),
        KindDescriptor::Enum { values } => FieldKind::Enum(values.clone()),
        KindDescriptor::Literal { value } => FieldKind::Literal(value.clone()),
        KindDescriptor::Unknown => return None,
    };
    Some(with_flags(descriptor, kind))
}

fn with_flags(descriptor: &FieldDescriptor, kind: FieldKind) -> FieldSchema {
    let default = descriptor.default.as_ref().map(|default| match default {
        DefaultDescriptor::Value { value } => DefaultValue::Literal(value.clone()),
        DefaultDescriptor::Deferred {
            producer: DeferredProducer::Now,
        } => DefaultValue::Deferred(DeferredDefault::Now),
    });
    FieldSchema {
        name: descriptor.name.clone(),
        kind,
        optional: descriptor.optional,
        nullable: descriptor.nullable,
        default,
    }
}

/// Maps a descriptor to its column. A field this build cannot fully rehydrate
/// keeps its outer shape: composites stay `JSONB`, strings with an unknown
/// format drop the format, and unknown kinds become `TEXT`.
#[must_use]
pub fn map_descriptor(descriptor: &FieldDescriptor) -> ColumnDefinition {
    if let Some(field) = rehydrate(descriptor) {
        return map_field(&field);
    }
    let kind = match &descriptor.kind {
        KindDescriptor::Object { .. }
        | KindDescriptor::Array { .. }
        | KindDescriptor::Record { .. } => FieldKind::Object(Vec::new()),
        KindDescriptor::String {
            min_length,
            max_length,
            ..
        } => FieldKind::String(StringConstraints {
            min_length: *min_length,
            max_length: *max_length,
            format: None,
        }),
        _ => FieldKind::String(StringConstraints::default()),
    };
    let column = map_field(&with_flags(descriptor, kind));
    tracing::warn!(
        field = %descriptor.name,
        column_type = %column.column_type.sql(),
        "unrecognized kind or format in descriptor; using fallback column type"
    );
    column
}
