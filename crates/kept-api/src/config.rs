use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use kept_core::embedding::DEFAULT_EMBEDDING_MODEL;
use kept_core::util::{is_http_url, normalize_text_option};
use thiserror::Error;

/// Shortest accepted HS256 signing secret, in bytes
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub sync_max_changes: usize,
    pub embedding: Option<EmbeddingConfig>,
}

/// Settings for the OpenAI-compatible embeddings provider
#[derive(Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EmbeddingConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field("sync_max_changes", &self.sync_max_changes)
            .field("embedding", &self.embedding)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "KEPT_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "KEPT_DATABASE_PATH", "kept.db");

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        let jwt_issuer = optional_trimmed(&lookup, "JWT_ISSUER");

        let auth_clock_skew_secs: u64 = ranged(&lookup, "AUTH_CLOCK_SKEW_SECS", 60, 0..=300)?;
        let rate_limit_window_secs: u64 =
            ranged(&lookup, "RATE_LIMIT_WINDOW_SECS", 60, 10..=3_600)?;
        let sync_rate_limit_per_window =
            ranged(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", 60, 1..=1_000)?;
        let sync_max_changes = ranged(&lookup, "SYNC_MAX_CHANGES", 1_000, 1..=10_000)?;

        let embedding = parse_embedding_config(&lookup)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            sync_max_changes,
            embedding,
        })
    }
}

/// Embeddings are enabled by setting `OPENAI_API_KEY`
fn parse_embedding_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<EmbeddingConfig>, ConfigError> {
    let Some(api_key) = optional_trimmed(&lookup, "OPENAI_API_KEY") else {
        return Ok(None);
    };

    let base_url = value_or_default(&lookup, "OPENAI_BASE_URL", "https://api.openai.com/v1");
    if !is_http_url(&base_url) {
        return Err(ConfigError::Invalid(
            "OPENAI_BASE_URL must start with http:// or https://".to_string(),
        ));
    }
    let model = value_or_default(&lookup, "EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL);
    let timeout_secs: u64 = ranged(&lookup, "EMBEDDING_TIMEOUT_SECS", 10, 1..=120)?;

    Ok(Some(EmbeddingConfig {
        api_key,
        base_url: base_url.trim_end_matches('/').to_string(),
        model,
        timeout: Duration::from_secs(timeout_secs),
    }))
}

/// Parse an integer setting that must fall within `range`
fn ranged<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let bounds = format!("[{}, {}]", range.start(), range.end());
    let value = match optional_trimmed(lookup, name) {
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::Invalid(format!("{name} must be an integer in {bounds}"))
        })?,
        None => default,
    };
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!("{name} must be in {bounds}")));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    pub(crate) const TEST_SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));

        let err = config_from(&[("JWT_SECRET", "short")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_applies_defaults() {
        let config = config_from(&[("JWT_SECRET", TEST_SECRET)]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, "kept.db");
        assert_eq!(config.jwt_issuer, None);
        assert_eq!(config.auth_clock_skew, Duration::from_secs(60));
        assert_eq!(config.sync_rate_limit_per_window, 60);
        assert_eq!(config.sync_max_changes, 1_000);
        assert!(config.embedding.is_none());
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let err = config_from(&[("JWT_SECRET", TEST_SECRET), ("SYNC_MAX_CHANGES", "0")])
            .unwrap_err();
        assert!(err.to_string().contains("SYNC_MAX_CHANGES must be in [1, 10000]"));

        let err = config_from(&[("JWT_SECRET", TEST_SECRET), ("AUTH_CLOCK_SKEW_SECS", "soon")])
            .unwrap_err();
        assert!(err.to_string().contains("AUTH_CLOCK_SKEW_SECS must be an integer"));
    }

    #[test]
    fn config_enables_embeddings_with_api_key() {
        let config = config_from(&[
            ("JWT_SECRET", TEST_SECRET),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1/"),
            ("EMBEDDING_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        let embedding = config.embedding.unwrap();
        assert_eq!(embedding.base_url, "http://localhost:11434/v1");
        assert_eq!(embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(embedding.timeout, Duration::from_secs(3));

        let err = config_from(&[
            ("JWT_SECRET", TEST_SECRET),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "localhost"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("OPENAI_BASE_URL"));
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let config = config_from(&[
            ("JWT_SECRET", TEST_SECRET),
            ("OPENAI_API_KEY", "sensitive-openai-key"),
        ])
        .unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(TEST_SECRET));
        assert!(!debug_output.contains("sensitive-openai-key"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
