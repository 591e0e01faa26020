use thiserror::Error;

use crate::schema::SchemaDefinitionError;
use crate::validate::SchemaValidationError;

/// Network-level failure talking to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("control_plane_base_url_missing")]
    BaseUrlMissing,
    #[error("control_plane_invalid_base_url:{url}")]
    InvalidBaseUrl { url: String },
    #[error("control_plane_invalid_path")]
    InvalidPath,
    #[error("control_plane_request_failed:{message}")]
    Request { message: String },
    #[error("control_plane_timeout:{message}")]
    Timeout { message: String },
    #[error("control_plane_read_failed:{message}")]
    Read { message: String },
    #[error("control_plane_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("control_plane_json_decode_failed:{message}")]
    Decode { message: String },
}

/// Provisioning stage that failed at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    EnsureSchema,
    EnsureTable,
}

impl ProvisioningStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnsureSchema => "ensure_schema",
            Self::EnsureTable => "ensure_table",
        }
    }
}

/// Namespace or table creation failed. Cloneable so every caller waiting on
/// one provisioning attempt receives the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    #[error("namespace `{namespace}` could not be ensured: {message}")]
    SchemaRejected { namespace: String, message: String },
    #[error("table `{namespace}.{table}` could not be created: {message}")]
    TableRejected {
        namespace: String,
        table: String,
        message: String,
    },
    #[error("provisioning {} failed: {source}", .stage.as_str())]
    Transport {
        stage: ProvisioningStage,
        #[source]
        source: TransportError,
    },
}

/// The query endpoint answered `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} on `{table}` failed: {message}")]
pub struct QueryError {
    pub table: String,
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Definition(#[from] SchemaDefinitionError),
    #[error(transparent)]
    Validation(#[from] SchemaValidationError),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("{operation} on `{table}`: {source}")]
    Transport {
        table: String,
        operation: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("table `{table}` is not declared in the schema definition")]
    UnknownTable { table: String },
    #[error("no row in `{table}` with id `{id}`")]
    NotFound { table: String, id: String },
    #[error("unexpected response shape from {operation} on `{table}`: {message}")]
    Decode {
        table: String,
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    /// True for transport failures on read operations, which a caller may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { operation, .. } if matches!(*operation, "select" | "count")
        )
    }
}
