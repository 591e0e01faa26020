//! Typed operations against one declared table.
//!
//! Each call provisions the table if needed, then makes exactly one request to
//! the query endpoint. Payloads are validated before any network traffic.
//! Query calls are never retried here; mutations are not idempotent.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{QueryError, StoreError};
use crate::provisioning::ProvisioningManager;
use crate::query::{Condition, QueryOptions};
use crate::schema::{ID_COLUMN, TableSchema};
use crate::transport::{QueryOperation, QueryRequest};
use crate::validate::{
    FieldViolation, Record, SchemaValidationError, ValidationMode, validate_payload,
};

pub struct TableClient<'a> {
    manager: &'a ProvisioningManager,
    name: &'a str,
    schema: &'a TableSchema,
    schema_version: u32,
}

impl<'a> TableClient<'a> {
    pub(crate) fn new(
        manager: &'a ProvisioningManager,
        name: &'a str,
        schema: &'a TableSchema,
        schema_version: u32,
    ) -> Self {
        Self {
            manager,
            name,
            schema,
            schema_version,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        self.schema
    }

    pub async fn select(&self, options: QueryOptions) -> Result<Vec<Record>, StoreError> {
        let data = self
            .send(QueryOperation::Select, "select", options, None)
            .await?;
        self.rows(data, "select")
    }

    /// `select`, decoding every row into `T`.
    pub async fn select_as<T: DeserializeOwned>(
        &self,
        options: QueryOptions,
    ) -> Result<Vec<T>, StoreError> {
        self.select(options)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row)).map_err(|error| StoreError::Decode {
                    table: self.name.to_string(),
                    operation: "select",
                    message: error.to_string(),
                })
            })
            .collect()
    }

    /// First matching row, or `None` when nothing matches.
    pub async fn select_one(&self, options: QueryOptions) -> Result<Option<Record>, StoreError> {
        Ok(self.select(options.limit(1)).await?.into_iter().next())
    }

    pub async fn insert(&self, payload: Record) -> Result<Record, StoreError> {
        validate_payload(self.name, self.schema, &payload, ValidationMode::Insert)?;
        let data = self
            .send(
                QueryOperation::Insert,
                "insert",
                QueryOptions::new(),
                Some(Value::Object(payload)),
            )
            .await?;
        self.rows(data, "insert")?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode {
                table: self.name.to_string(),
                operation: "insert",
                message: "insert returned no rows".to_string(),
            })
    }

    /// Inserts all rows in one request. Any invalid row rejects the batch;
    /// violation paths are prefixed with the row index. An empty batch still
    /// provisions the table but sends no query.
    pub async fn insert_many(&self, payloads: Vec<Record>) -> Result<Vec<Record>, StoreError> {
        if payloads.is_empty() {
            self.manager
                .ensure_table(self.name, self.schema, self.schema_version)
                .await?;
            return Ok(Vec::new());
        }
        let mut violations = Vec::new();
        for (index, payload) in payloads.iter().enumerate() {
            if let Err(error) =
                validate_payload(self.name, self.schema, payload, ValidationMode::Insert)
            {
                violations.extend(error.violations.into_iter().map(|violation| FieldViolation {
                    path: format!("[{index}].{}", violation.path),
                    message: violation.message,
                }));
            }
        }
        if !violations.is_empty() {
            return Err(SchemaValidationError {
                table: self.name.to_string(),
                violations,
            }
            .into());
        }

        let data = Value::Array(payloads.into_iter().map(Value::Object).collect());
        let data = self
            .send(
                QueryOperation::Insert,
                "insert",
                QueryOptions::new(),
                Some(data),
            )
            .await?;
        self.rows(data, "insert")
    }

    /// Updates the row with `id`; `NotFound` when no row matched.
    pub async fn update(&self, id: &str, patch: Record) -> Result<Record, StoreError> {
        self.update_where(vec![Condition::eq(ID_COLUMN, id)], patch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                table: self.name.to_string(),
                id: id.to_string(),
            })
    }

    pub async fn update_where(
        &self,
        conditions: Vec<Condition>,
        patch: Record,
    ) -> Result<Vec<Record>, StoreError> {
        validate_payload(self.name, self.schema, &patch, ValidationMode::Patch)?;
        let options = QueryOptions {
            conditions,
            ..QueryOptions::default()
        };
        let data = self
            .send(
                QueryOperation::Update,
                "update",
                options,
                Some(Value::Object(patch)),
            )
            .await?;
        self.rows(data, "update")
    }

    /// True when a row was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .delete_where(vec![Condition::eq(ID_COLUMN, id)])
            .await?
            > 0)
    }

    /// Number of rows removed.
    pub async fn delete_where(&self, conditions: Vec<Condition>) -> Result<u64, StoreError> {
        let options = QueryOptions {
            conditions,
            ..QueryOptions::default()
        };
        let data = self
            .send(QueryOperation::Delete, "delete", options, None)
            .await?;
        match data {
            Some(Value::Number(number)) => number.as_u64().ok_or_else(|| StoreError::Decode {
                table: self.name.to_string(),
                operation: "delete",
                message: format!("invalid count {number}"),
            }),
            other => Ok(self.rows(other, "delete")?.len() as u64),
        }
    }

    pub async fn count(&self, conditions: Option<Vec<Condition>>) -> Result<u64, StoreError> {
        let options = QueryOptions {
            conditions: conditions.unwrap_or_default(),
            count: true,
            ..QueryOptions::default()
        };
        let data = self
            .send(QueryOperation::Select, "count", options, None)
            .await?;
        let count = match &data {
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::Object(object)) => object.get("count").and_then(Value::as_u64),
            _ => None,
        };
        count.ok_or_else(|| StoreError::Decode {
            table: self.name.to_string(),
            operation: "count",
            message: format!("expected a count, received {}", describe(data.as_ref())),
        })
    }

    async fn send(
        &self,
        operation: QueryOperation,
        label: &'static str,
        options: QueryOptions,
        data: Option<Value>,
    ) -> Result<Option<Value>, StoreError> {
        self.manager
            .ensure_table(self.name, self.schema, self.schema_version)
            .await?;

        let request = QueryRequest {
            namespace: self.manager.namespace().to_string(),
            table_name: self.name.to_string(),
            operation,
            options,
            data,
        };
        tracing::debug!(
            namespace = %request.namespace,
            table = self.name,
            operation = label,
            "query"
        );
        let response = self
            .manager
            .control_plane()
            .query(&request)
            .await
            .map_err(|source| StoreError::Transport {
                table: self.name.to_string(),
                operation: label,
                source,
            })?;

        if !response.success {
            return Err(QueryError {
                table: self.name.to_string(),
                operation: label,
                message: response
                    .error
                    .unwrap_or_else(|| "query endpoint reported failure".to_string()),
            }
            .into());
        }
        Ok(response.data)
    }

    fn rows(&self, data: Option<Value>, operation: &'static str) -> Result<Vec<Record>, StoreError> {
        let items = match data {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(StoreError::Decode {
                    table: self.name.to_string(),
                    operation,
                    message: format!("expected an array of rows, received {}", describe(Some(&other))),
                });
            }
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(StoreError::Decode {
                    table: self.name.to_string(),
                    operation,
                    message: format!("expected a row object, received {}", describe(Some(&other))),
                }),
            })
            .collect()
    }
}

fn describe(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
