use std::env;
use std::time::Duration;

use thiserror::Error;

pub const ENV_BASE_URL: &str = "TENANT_STORE_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "TENANT_STORE_TIMEOUT_MS";
pub const ENV_REQUEST_ATTEMPTS: &str = "TENANT_STORE_REQUEST_ATTEMPTS";
pub const ENV_RETRY_BACKOFF_MS: &str = "TENANT_STORE_RETRY_BACKOFF_MS";
pub const ENV_AUTH_TOKEN: &str = "TENANT_STORE_AUTH_TOKEN";

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const MIN_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("TENANT_STORE_BASE_URL must be set")]
    MissingBaseUrl,
    #[error("invalid base url `{0}`: must use http:// or https:// and include a host")]
    InvalidBaseUrl(String),
    #[error("invalid {key}: {message}")]
    InvalidNumber { key: &'static str, message: String },
}

/// Bounded retry for idempotent control-plane calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: usize,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_REQUEST_ATTEMPTS,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
    pub auth_token: Option<String>,
}

impl StoreConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(MIN_TIMEOUT_MS))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let base_url = lookup(ENV_BASE_URL).ok_or(ConfigError::MissingBaseUrl)?;
        let base_url = normalize_base_url(&base_url)?;
        let timeout_ms = parse_number(&lookup, ENV_TIMEOUT_MS, DEFAULT_TIMEOUT_MS)?;
        let attempts = parse_number(&lookup, ENV_REQUEST_ATTEMPTS, DEFAULT_REQUEST_ATTEMPTS)?;
        let backoff_ms = parse_number(&lookup, ENV_RETRY_BACKOFF_MS, DEFAULT_RETRY_BACKOFF_MS)?;
        Ok(Self {
            base_url,
            timeout_ms: timeout_ms.max(MIN_TIMEOUT_MS),
            retry: RetryPolicy {
                attempts: attempts.max(1),
                backoff_ms,
            },
            auth_token: lookup(ENV_AUTH_TOKEN),
        })
    }
}

fn parse_number<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|error| ConfigError::InvalidNumber {
            key,
            message: error.to_string(),
        }),
    }
}

/// Trims, drops trailing `/`, and requires an http(s) scheme with a host.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::MissingBaseUrl);
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl(trimmed.to_string()));
    };
    if !matches!(scheme, "http" | "https") || remainder.is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidBaseUrl(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_base_url_is_set() {
        let config = StoreConfig::from_lookup(lookup(&[(ENV_BASE_URL, "https://store.example.com/")]))
            .expect("config");
        assert_eq!(config.base_url, "https://store.example.com");
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.auth_token, None);
    }

    #[test]
    fn overrides_are_parsed_and_floored() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "http://127.0.0.1:8080"),
            (ENV_TIMEOUT_MS, "10"),
            (ENV_REQUEST_ATTEMPTS, "0"),
            (ENV_RETRY_BACKOFF_MS, "50"),
            (ENV_AUTH_TOKEN, " secret "),
        ]))
        .expect("config");
        assert_eq!(config.timeout_ms, MIN_TIMEOUT_MS);
        assert_eq!(config.retry.attempts, 1);
        assert_eq!(config.retry.backoff_ms, 50);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn invalid_values_name_the_key() {
        let missing = StoreConfig::from_lookup(lookup(&[]));
        assert_eq!(missing, Err(ConfigError::MissingBaseUrl));

        let bad_number = StoreConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://store.example.com"),
            (ENV_TIMEOUT_MS, "soon"),
        ]));
        assert!(matches!(
            bad_number,
            Err(ConfigError::InvalidNumber { key: ENV_TIMEOUT_MS, .. })
        ));

        let bad_url = StoreConfig::from_lookup(lookup(&[(ENV_BASE_URL, "ftp://store")]));
        assert!(matches!(bad_url, Err(ConfigError::InvalidBaseUrl(_))));
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff_ms: 100,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(RetryPolicy::none().backoff(5), Duration::ZERO);
    }
}
