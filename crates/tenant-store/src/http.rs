//! HTTP implementation of the control-plane contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{ConfigError, StoreConfig, normalize_base_url};
use crate::error::TransportError;
use crate::transport::{
    CheckTableRequest, CheckTableResponse, ControlPlane, EnsureSchemaRequest, EnsureTableRequest,
    MutationResponse, QueryRequest, QueryResponse,
};

pub const CHECK_TABLE_PATH: &str = "/storage/check-table";
pub const ENSURE_SCHEMA_PATH: &str = "/storage/ensure-schema";
pub const ENSURE_TABLE_PATH: &str = "/storage/ensure-table";
pub const QUERY_PATH: &str = "/storage/query";

/// Single-attempt JSON client. Retries are decided by the caller, per
/// operation, so mutations are never replayed here.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    base_url: String,
    timeout: Duration,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpControlPlane {
    pub fn new(config: &StoreConfig) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(&config.base_url).map_err(|error| match error {
            ConfigError::MissingBaseUrl => TransportError::BaseUrlMissing,
            _ => TransportError::InvalidBaseUrl {
                url: config.base_url.trim().to_string(),
            },
        })?;
        Ok(Self {
            base_url,
            timeout: config.timeout(),
            auth_token: config.auth_token.clone(),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    pub async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, TransportError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(TransportError::InvalidPath)?;
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        tracing::debug!(%url, %request_id, "control plane request");

        let mut request = self
            .http
            .post(url.as_str())
            .header("x-request-id", request_id)
            .timeout(self.timeout)
            .json(payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        decode_json_response(response).await
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn check_table(
        &self,
        request: &CheckTableRequest,
    ) -> Result<CheckTableResponse, TransportError> {
        self.post_json(CHECK_TABLE_PATH, request).await
    }

    async fn ensure_schema(
        &self,
        request: &EnsureSchemaRequest,
    ) -> Result<MutationResponse, TransportError> {
        self.post_json(ENSURE_SCHEMA_PATH, request).await
    }

    async fn ensure_table(
        &self,
        request: &EnsureTableRequest,
    ) -> Result<MutationResponse, TransportError> {
        self.post_json(ENSURE_TABLE_PATH, request).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, TransportError> {
        self.post_json(QUERY_PATH, request).await
    }
}

fn classify_send_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            message: error.to_string(),
        }
    } else {
        TransportError::Request {
            message: error.to_string(),
        }
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> TransportError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    TransportError::Http {
        status: status.as_u16(),
        body,
    }
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, TransportError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| {
        if error.is_timeout() {
            TransportError::Timeout {
                message: error.to_string(),
            }
        } else {
            TransportError::Read {
                message: error.to_string(),
            }
        }
    })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| TransportError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let client = HttpControlPlane::new(&StoreConfig::new("https://store.example.com/"))
            .expect("control plane client");

        assert_eq!(
            client.endpoint(CHECK_TABLE_PATH),
            Some("https://store.example.com/storage/check-table".to_string())
        );
        assert_eq!(
            client.endpoint("storage/query"),
            Some("https://store.example.com/storage/query".to_string())
        );
        assert_eq!(client.endpoint(" "), None);
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(StatusCode::BAD_GATEWAY, b" gateway failed ");
        assert_eq!(error.to_string(), "control_plane_http_502:gateway failed");

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(empty_body.to_string(), "control_plane_http_503:<empty>");
    }

    #[test]
    fn base_url_is_validated() {
        let missing = HttpControlPlane::new(&StoreConfig::new("   "));
        assert!(matches!(missing, Err(TransportError::BaseUrlMissing)));

        let invalid = HttpControlPlane::new(&StoreConfig::new("store.example.com"));
        assert!(matches!(invalid, Err(TransportError::InvalidBaseUrl { .. })));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let mut config = StoreConfig::new("http://127.0.0.1:9");
        config.timeout_ms = 300;
        let client = HttpControlPlane::new(&config).expect("control plane client");
        let result = client
            .check_table(&CheckTableRequest {
                namespace: "tenant_a_b".to_string(),
                table_name: "users".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(TransportError::Request { .. } | TransportError::Timeout { .. })
        ));
    }
}
