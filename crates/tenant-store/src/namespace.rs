//! Tenant namespace derivation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming::{MAX_IDENTIFIER_LEN, sanitize_identifier};

const NAMESPACE_PREFIX: &str = "tenant";

/// Application and company pair that owns a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId {
    pub app_id: String,
    pub company_id: String,
}

impl TenantId {
    #[must_use]
    pub fn new(app_id: impl Into<String>, company_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            company_id: company_id.into(),
        }
    }
}

/// Identifier-safe schema name isolating one tenant's tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// `tenant_<app>_<company>`, sanitized and capped at the identifier limit.
    #[must_use]
    pub fn derive(tenant: &TenantId) -> Self {
        let mut name = format!(
            "{NAMESPACE_PREFIX}_{}_{}",
            sanitize_identifier(&tenant.app_id),
            sanitize_identifier(&tenant.company_id)
        );
        name.truncate(MAX_IDENTIFIER_LEN);
        Self(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cache key for one table in this namespace.
    #[must_use]
    pub fn table_key(&self, table: &str) -> String {
        format!("{}.{table}", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
