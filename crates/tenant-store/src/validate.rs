//! Local payload validation, run before any network call.

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::{
    FieldKind, FieldSchema, NumberConstraints, STANDARD_COLUMNS, StringConstraints, StringFormat,
    TableSchema,
};

/// A row payload or result row.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload for `{table}` failed validation: {}", format_violations(.violations))]
pub struct SchemaValidationError {
    pub table: String,
    pub violations: Vec<FieldViolation>,
}

impl SchemaValidationError {
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.violations
            .iter()
            .map(|violation| violation.path.as_str())
            .collect()
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|violation| format!("{}: {}", violation.path, violation.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Whether absent fields count as violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Every field without a default and not optional must be present.
    Insert,
    /// Only the keys present are checked.
    Patch,
}

/// Validates a payload against a table schema. Standard columns are accepted
/// untouched; keys the schema does not declare are violations.
pub fn validate_payload(
    table: &str,
    schema: &TableSchema,
    payload: &Record,
    mode: ValidationMode,
) -> Result<(), SchemaValidationError> {
    let mut violations = Vec::new();
    check_fields(schema.fields(), payload, mode, "", &mut violations);
    for key in payload.keys() {
        if schema.get(key).is_none() && !STANDARD_COLUMNS.contains(&key.as_str()) {
            violations.push(FieldViolation {
                path: key.clone(),
                message: "unknown field".to_string(),
            });
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaValidationError {
            table: table.to_string(),
            violations,
        })
    }
}

fn check_fields(
    fields: &[FieldSchema],
    object: &Record,
    mode: ValidationMode,
    prefix: &str,
    violations: &mut Vec<FieldViolation>,
) {
    for field in fields {
        let path = join_path(prefix, &field.name);
        match object.get(&field.name) {
            None => {
                if mode == ValidationMode::Insert && !field.may_be_absent() {
                    violations.push(violation(&path, "required"));
                }
            }
            Some(value) => check_value(field, value, &path, violations),
        }
    }
}

fn check_value(field: &FieldSchema, value: &Value, path: &str, violations: &mut Vec<FieldViolation>) {
    if value.is_null() {
        if !field.nullable {
            violations.push(violation(
                path,
                &format!("expected {}, received null", field.kind.name()),
            ));
        }
        return;
    }
    match &field.kind {
        FieldKind::String(constraints) => match value.as_str() {
            Some(text) => check_string(constraints, text, path, violations),
            None => violations.push(type_mismatch(path, "string", value)),
        },
        FieldKind::Number(constraints) => match value.as_f64() {
            Some(number) => check_number(constraints, value, number, path, violations),
            None => violations.push(type_mismatch(path, "number", value)),
        },
        FieldKind::Boolean => {
            if !value.is_boolean() {
                violations.push(type_mismatch(path, "boolean", value));
            }
        }
        FieldKind::Date => match value.as_str() {
            Some(text) if DateTime::parse_from_rfc3339(text).is_ok() => {}
            Some(_) => violations.push(violation(path, "invalid date")),
            None => violations.push(type_mismatch(path, "date", value)),
        },
        FieldKind::Object(fields) => match value.as_object() {
            Some(object) => {
                check_fields(fields, object, ValidationMode::Insert, path, violations);
            }
            None => violations.push(type_mismatch(path, "object", value)),
        },
        FieldKind::Array(element) => match value.as_array() {
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    check_value(element, item, &format!("{path}[{index}]"), violations);
                }
            }
            None => violations.push(type_mismatch(path, "array", value)),
        },
        FieldKind::Record(entry) => match value.as_object() {
            Some(object) => {
                for (key, item) in object {
                    check_value(entry, item, &join_path(path, key), violations);
                }
            }
            None => violations.push(type_mismatch(path, "record", value)),
        },
        FieldKind::Enum(allowed) => match value.as_str() {
            Some(text) if allowed.iter().any(|candidate| candidate == text) => {}
            _ => violations.push(violation(
                path,
                &format!("expected one of [{}]", allowed.join(", ")),
            )),
        },
        FieldKind::Literal(expected) => {
            if value != expected {
                violations.push(violation(path, &format!("expected literal {expected}")));
            }
        }
    }
}

fn check_string(
    constraints: &StringConstraints,
    text: &str,
    path: &str,
    violations: &mut Vec<FieldViolation>,
) {
    let length = text.chars().count();
    if let Some(max) = constraints.max_length
        && length > max as usize
    {
        violations.push(violation(path, &format!("longer than {max} characters")));
    }
    if let Some(min) = constraints.min_length
        && length < min as usize
    {
        violations.push(violation(path, &format!("shorter than {min} characters")));
    }
    match constraints.format {
        Some(StringFormat::Uuid) if Uuid::parse_str(text).is_err() => {
            violations.push(violation(path, "invalid uuid"));
        }
        Some(StringFormat::Email) if !looks_like_email(text) => {
            violations.push(violation(path, "invalid email"));
        }
        _ => {}
    }
}

fn check_number(
    constraints: &NumberConstraints,
    value: &Value,
    number: f64,
    path: &str,
    violations: &mut Vec<FieldViolation>,
) {
    let integral = value.is_i64() || value.is_u64() || number.fract() == 0.0;
    if constraints.integer && !integral {
        violations.push(violation(path, "expected integer"));
    }
    if let Some(min) = constraints.min
        && number < min
    {
        violations.push(violation(path, &format!("less than {min}")));
    }
    if let Some(max) = constraints.max
        && number > max
    {
        violations.push(violation(path, &format!("greater than {max}")));
    }
}

fn looks_like_email(text: &str) -> bool {
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !text.chars().any(char::is_whitespace)
}

fn type_mismatch(path: &str, expected: &str, value: &Value) -> FieldViolation {
    let received = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    violation(path, &format!("expected {expected}, received {received}"))
}

fn violation(path: &str, message: &str) -> FieldViolation {
    FieldViolation {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
