//! Control-plane contract: request/response shapes and the transport trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::TableDescriptor;
use crate::error::TransportError;
use crate::query::QueryOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckTableRequest {
    pub namespace: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTableResponse {
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureSchemaRequest {
    pub namespace: String,
    pub app_id: String,
    pub company_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureTableRequest {
    pub namespace: String,
    pub table_name: String,
    pub ddl: String,
    pub schema: TableDescriptor,
    pub schema_version: u32,
}

/// Outcome of a control-plane mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutationResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOperation {
    Select,
    Insert,
    Update,
    Delete,
}

/// One structured request to the query endpoint.
///
/// `options.where` scopes selects, updates and deletes. `data` carries the
/// row(s) for inserts and the patch for updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub namespace: String,
    pub table_name: String,
    pub operation: QueryOperation,
    #[serde(default)]
    pub options: QueryOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Remote storage control plane.
///
/// Implementations report only transport failures as `Err`; a remote refusal
/// comes back as `Ok` with `success: false`.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn check_table(
        &self,
        request: &CheckTableRequest,
    ) -> Result<CheckTableResponse, TransportError>;

    async fn ensure_schema(
        &self,
        request: &EnsureSchemaRequest,
    ) -> Result<MutationResponse, TransportError>;

    async fn ensure_table(
        &self,
        request: &EnsureTableRequest,
    ) -> Result<MutationResponse, TransportError>;

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, TransportError>;
}
