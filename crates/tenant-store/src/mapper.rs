//! Field schema to column mapping.

use serde_json::Value;

use crate::naming::wants_index;
use crate::schema::{
    DeferredDefault, DefaultValue, FieldKind, FieldSchema, NumberConstraints, StringConstraints,
    StringFormat,
};

/// Longest `max_length` that still maps to a bounded character type.
pub const MAX_VARCHAR_LENGTH: u32 = 255;

pub const CURRENT_TIMESTAMP_SQL: &str = "NOW()";
pub const RANDOM_UUID_SQL: &str = "gen_random_uuid()";

/// Column types the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Varchar(u32),
    Text,
    Integer,
    Numeric,
    Boolean,
    TimestampTz,
    Jsonb,
}

impl ColumnType {
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            Self::Uuid => "UUID".to_string(),
            Self::Varchar(length) => format!("VARCHAR({length})"),
            Self::Text => "TEXT".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::Numeric => "NUMERIC".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            Self::Jsonb => "JSONB".to_string(),
        }
    }
}

/// One compiled column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Rendered SQL expression for the `DEFAULT` clause.
    pub default: Option<String>,
    pub primary_key: bool,
    /// Recommendation to emit an index on this column.
    pub indexed: bool,
}

impl ColumnDefinition {
    /// Column DDL fragment, e.g. `"name" VARCHAR(100) NOT NULL`.
    #[must_use]
    pub fn render(&self) -> String {
        let mut sql = format!(
            "{} {}",
            crate::naming::quote_identifier(&self.name),
            self.column_type.sql()
        );
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if self.nullable {
            sql.push_str(" NULL");
        } else {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Maps one declared field to its column. Pure and deterministic.
#[must_use]
pub fn map_field(field: &FieldSchema) -> ColumnDefinition {
    let nullable = if field.has_default() {
        field.nullable
    } else {
        field.optional || field.nullable
    };
    ColumnDefinition {
        name: field.name.clone(),
        column_type: column_type(&field.kind),
        nullable,
        default: field.default.as_ref().map(render_default),
        primary_key: false,
        indexed: wants_index(&field.name),
    }
}

#[must_use]
pub fn column_type(kind: &FieldKind) -> ColumnType {
    match kind {
        FieldKind::String(StringConstraints {
            format: Some(StringFormat::Uuid),
            ..
        }) => ColumnType::Uuid,
        FieldKind::String(StringConstraints {
            max_length: Some(length),
            ..
        }) if *length <= MAX_VARCHAR_LENGTH => ColumnType::Varchar(*length),
        FieldKind::String(_) => ColumnType::Text,
        FieldKind::Number(NumberConstraints { integer: true, .. }) => ColumnType::Integer,
        FieldKind::Number(_) => ColumnType::Numeric,
        FieldKind::Boolean => ColumnType::Boolean,
        FieldKind::Date => ColumnType::TimestampTz,
        FieldKind::Object(_) | FieldKind::Array(_) | FieldKind::Record(_) => ColumnType::Jsonb,
        // Value set is not enforced by a CHECK constraint.
        FieldKind::Enum(_) => ColumnType::Text,
        FieldKind::Literal(value) => literal_column_type(value),
    }
}

fn literal_column_type(value: &Value) -> ColumnType {
    match value {
        Value::String(_) => ColumnType::Text,
        Value::Number(number) if number.is_i64() || number.is_u64() => ColumnType::Integer,
        Value::Number(_) => ColumnType::Numeric,
        Value::Bool(_) => ColumnType::Boolean,
        Value::Null | Value::Array(_) | Value::Object(_) => ColumnType::Jsonb,
    }
}

/// SQL expression for a `DEFAULT` clause.
#[must_use]
pub fn render_default(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Deferred(DeferredDefault::Now) => CURRENT_TIMESTAMP_SQL.to_string(),
        DefaultValue::Literal(value) => render_literal(value),
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote_literal(text),
        Value::Array(_) | Value::Object(_) => format!("{}::jsonb", quote_literal(&value.to_string())),
    }
}

/// Single-quoted SQL string literal.
#[must_use]
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
