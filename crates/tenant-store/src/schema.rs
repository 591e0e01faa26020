//! Declarative field and table schemas.
//!
//! A [`SchemaDefinition`] is built once at startup and shared by reference with
//! the provisioning manager and every table client. Nothing in this crate
//! mutates it after [`SchemaDefinitionBuilder::build`] succeeds.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::naming::{MAX_IDENTIFIER_LEN, is_identifier};

/// Column names every compiled table carries regardless of the declared fields.
pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const STANDARD_COLUMNS: [&str; 3] = [ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Recognized string formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Uuid,
    Email,
}

impl StringFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Email => "email",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "uuid" => Some(Self::Uuid),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringConstraints {
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub format: Option<StringFormat>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberConstraints {
    pub integer: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Closed set of base kinds. Each arm carries its kind-specific constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String(StringConstraints),
    Number(NumberConstraints),
    Boolean,
    Date,
    Object(Vec<FieldSchema>),
    Array(Box<FieldSchema>),
    Record(Box<FieldSchema>),
    Enum(Vec<String>),
    Literal(Value),
}

impl FieldKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Record(_) => "record",
            Self::Enum(_) => "enum",
            Self::Literal(_) => "literal",
        }
    }
}

/// Deferred defaults are produced by the storage engine at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredDefault {
    Now,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Literal(Value),
    Deferred(DeferredDefault),
}

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub optional: bool,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
}

impl FieldSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            nullable: false,
            default: None,
        }
    }

    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String(StringConstraints::default()))
    }

    #[must_use]
    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::String(StringConstraints {
                format: Some(StringFormat::Uuid),
                ..StringConstraints::default()
            }),
        )
    }

    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number(NumberConstraints::default()))
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Number(NumberConstraints {
                integer: true,
                ..NumberConstraints::default()
            }),
        )
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    #[must_use]
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    #[must_use]
    pub fn object(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self::new(name, FieldKind::Object(fields))
    }

    /// Array of `element`. The element's own name is ignored.
    #[must_use]
    pub fn array(name: impl Into<String>, element: FieldSchema) -> Self {
        Self::new(name, FieldKind::Array(Box::new(element)))
    }

    /// String-keyed map whose values follow `value`.
    #[must_use]
    pub fn record(name: impl Into<String>, value: FieldSchema) -> Self {
        Self::new(name, FieldKind::Record(Box::new(value)))
    }

    #[must_use]
    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldKind::Enum(values.into_iter().map(Into::into).collect()),
        )
    }

    #[must_use]
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, FieldKind::Literal(value))
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Literal(value));
        self
    }

    #[must_use]
    pub fn default_now(mut self) -> Self {
        self.default = Some(DefaultValue::Deferred(DeferredDefault::Now));
        self
    }

    /// No-op on non-string kinds.
    #[must_use]
    pub fn max_length(mut self, max: u32) -> Self {
        if let FieldKind::String(constraints) = &mut self.kind {
            constraints.max_length = Some(max);
        }
        self
    }

    #[must_use]
    pub fn min_length(mut self, min: u32) -> Self {
        if let FieldKind::String(constraints) = &mut self.kind {
            constraints.min_length = Some(min);
        }
        self
    }

    #[must_use]
    pub fn email(mut self) -> Self {
        if let FieldKind::String(constraints) = &mut self.kind {
            constraints.format = Some(StringFormat::Email);
        }
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        if let FieldKind::Number(constraints) = &mut self.kind {
            constraints.min = Some(min);
        }
        self
    }

    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        if let FieldKind::Number(constraints) = &mut self.kind {
            constraints.max = Some(max);
        }
        self
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Whether a payload may leave this field out.
    #[must_use]
    pub fn may_be_absent(&self) -> bool {
        self.optional || self.default.is_some()
    }

    #[must_use]
    pub fn is_uuid(&self) -> bool {
        matches!(
            &self.kind,
            FieldKind::String(StringConstraints {
                format: Some(StringFormat::Uuid),
                ..
            })
        )
    }
}

/// Ordered field set for one table. Order drives column order in DDL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    fields: Vec<FieldSchema>,
}

impl TableSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_fields(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaDefinitionError {
    #[error("invalid table name `{table}`")]
    InvalidTableName { table: String },
    #[error("duplicate table `{table}`")]
    DuplicateTable { table: String },
    #[error("invalid field name `{path}`")]
    InvalidFieldName { path: String },
    #[error("duplicate field `{path}`")]
    DuplicateField { path: String },
    #[error("field `{path}`: {reason}")]
    InvalidField { path: String, reason: String },
}

/// Named set of table schemas plus a version number.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    version: u32,
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaDefinition {
    #[must_use]
    pub fn builder(version: u32) -> SchemaDefinitionBuilder {
        SchemaDefinitionBuilder {
            version,
            tables: Vec::new(),
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables
            .iter()
            .map(|(name, schema)| (name.as_str(), schema))
    }
}

pub struct SchemaDefinitionBuilder {
    version: u32,
    tables: Vec<(String, TableSchema)>,
}

impl SchemaDefinitionBuilder {
    #[must_use]
    pub fn table(mut self, name: impl Into<String>, schema: TableSchema) -> Self {
        self.tables.push((name.into(), schema));
        self
    }

    pub fn build(self) -> Result<SchemaDefinition, SchemaDefinitionError> {
        let mut tables = BTreeMap::new();
        for (name, schema) in self.tables {
            if !is_identifier(&name) {
                return Err(SchemaDefinitionError::InvalidTableName { table: name });
            }
            validate_table_fields(&name, &schema)?;
            if tables.contains_key(&name) {
                return Err(SchemaDefinitionError::DuplicateTable { table: name });
            }
            tables.insert(name, schema);
        }
        Ok(SchemaDefinition {
            version: self.version,
            tables,
        })
    }
}

fn validate_table_fields(table: &str, schema: &TableSchema) -> Result<(), SchemaDefinitionError> {
    validate_field_set(table, schema.fields(), true)
}

fn validate_field_set(
    prefix: &str,
    fields: &[FieldSchema],
    top_level: bool,
) -> Result<(), SchemaDefinitionError> {
    let mut seen = HashSet::new();
    for field in fields {
        let path = format!("{prefix}.{}", field.name);
        // Nested object keys only need to be JSON keys; columns must be identifiers.
        let name_ok = if top_level {
            is_identifier(&field.name)
        } else {
            !field.name.is_empty() && field.name.len() <= MAX_IDENTIFIER_LEN
        };
        if !name_ok {
            return Err(SchemaDefinitionError::InvalidFieldName { path });
        }
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaDefinitionError::DuplicateField { path });
        }
        if top_level {
            validate_standard_column(&path, field)?;
        }
        validate_kind(&path, &field.kind)?;
    }
    Ok(())
}

fn validate_standard_column(path: &str, field: &FieldSchema) -> Result<(), SchemaDefinitionError> {
    let reason = match field.name.as_str() {
        ID_COLUMN if !field.is_uuid() => "`id` is the primary key and must be a uuid string",
        CREATED_AT_COLUMN | UPDATED_AT_COLUMN if field.kind != FieldKind::Date => {
            "standard timestamp columns must be dates"
        }
        _ => return Ok(()),
    };
    Err(SchemaDefinitionError::InvalidField {
        path: path.to_string(),
        reason: reason.to_string(),
    })
}

fn validate_kind(path: &str, kind: &FieldKind) -> Result<(), SchemaDefinitionError> {
    let invalid = |reason: &str| SchemaDefinitionError::InvalidField {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    match kind {
        FieldKind::String(constraints) => {
            if let (Some(min), Some(max)) = (constraints.min_length, constraints.max_length)
                && min > max
            {
                return Err(invalid("min_length exceeds max_length"));
            }
            Ok(())
        }
        FieldKind::Number(constraints) => {
            if let (Some(min), Some(max)) = (constraints.min, constraints.max)
                && min > max
            {
                return Err(invalid("min exceeds max"));
            }
            Ok(())
        }
        FieldKind::Enum(values) if values.is_empty() => Err(invalid("enum has no values")),
        FieldKind::Object(fields) => validate_field_set(path, fields, false),
        FieldKind::Array(element) | FieldKind::Record(element) => {
            validate_kind(&format!("{path}[]"), &element.kind)
        }
        FieldKind::Boolean | FieldKind::Date | FieldKind::Enum(_) | FieldKind::Literal(_) => {
            Ok(())
        }
    }
}
