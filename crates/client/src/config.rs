//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the cart REST API (e.g., <https://shop.example.com/api/>)
//!
//! ## Optional
//! - `CART_SESSION_HEADER` - Header carrying the anonymous session key (default: X-Session-Key)
//! - `CART_ACCESS_TOKEN` - Bearer token to seed the identity store with
//! - `CART_STORAGE_PATH` - JSON file for durable identity storage (default: in-memory)
//! - `CART_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `CART_BOOTSTRAP_TIMEOUT_SECS` - Identity bootstrap timeout (default: 10)
//! - `CART_READ_RETRY_ATTEMPTS` - Total attempts for idempotent reads (default: 3)
//! - `CART_READ_RETRY_BASE_MS` - First read retry delay, doubled per attempt (default: 200)
//! - `CART_STOCK_TTL_SECS` - Lifetime of a learned stock ceiling (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Default header used to transmit the anonymous session key.
pub const DEFAULT_SESSION_HEADER: &str = "X-Session-Key";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart client configuration.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct CartClientConfig {
    /// Base URL of the cart API; endpoint paths are joined onto it
    pub base_url: Url,
    /// Header carrying the anonymous session key in both directions
    pub session_header: String,
    /// Bearer token to seed the identity store with
    pub access_token: Option<SecretString>,
    /// Durable identity storage file (in-memory when absent)
    pub storage_path: Option<PathBuf>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Upper bound on the identity bootstrap call
    pub bootstrap_timeout: Duration,
    /// Total attempts for idempotent reads (1 disables retries)
    pub read_retry_attempts: u32,
    /// First retry delay; doubled on every further attempt
    pub read_retry_base: Duration,
    /// How long a learned stock ceiling stays valid
    pub stock_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl std::fmt::Debug for CartClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("session_header", &self.session_header)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("storage_path", &self.storage_path)
            .field("request_timeout", &self.request_timeout)
            .field("bootstrap_timeout", &self.bootstrap_timeout)
            .field("read_retry_attempts", &self.read_retry_attempts)
            .field("read_retry_base", &self.read_retry_base)
            .field("stock_ttl", &self.stock_ttl)
            .field("sentry_dsn", &self.sentry_dsn)
            .finish()
    }
}

impl CartClientConfig {
    /// Create a configuration with defaults for everything but the base URL.
    ///
    /// A trailing slash is added to the base URL so endpoint paths join
    /// underneath it instead of replacing its last segment.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            base_url,
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            access_token: None,
            storage_path: None,
            request_timeout: Duration::from_secs(30),
            bootstrap_timeout: Duration::from_secs(10),
            read_retry_attempts: 3,
            read_retry_base: Duration::from_millis(200),
            stock_ttl: Duration::from_secs(300),
            sentry_dsn: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = get_required_env("CART_API_BASE_URL")?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("CART_API_BASE_URL".to_string(), e.to_string())
        })?;

        let mut config = Self::new(base_url);
        config.session_header = get_env_or_default("CART_SESSION_HEADER", DEFAULT_SESSION_HEADER);
        if reqwest::header::HeaderName::from_str(&config.session_header).is_err() {
            return Err(ConfigError::InvalidEnvVar(
                "CART_SESSION_HEADER".to_string(),
                format!("not a valid header name: {}", config.session_header),
            ));
        }
        config.access_token = get_optional_env("CART_ACCESS_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);
        config.storage_path = get_optional_env("CART_STORAGE_PATH").map(PathBuf::from);
        config.request_timeout = Duration::from_secs(get_parsed_env("CART_REQUEST_TIMEOUT_SECS", 30)?);
        config.bootstrap_timeout =
            Duration::from_secs(get_parsed_env("CART_BOOTSTRAP_TIMEOUT_SECS", 10)?);
        config.read_retry_attempts = get_parsed_env("CART_READ_RETRY_ATTEMPTS", 3)?;
        config.read_retry_base = Duration::from_millis(get_parsed_env("CART_READ_RETRY_BASE_MS", 200)?);
        config.stock_ttl = Duration::from_secs(get_parsed_env("CART_STOCK_TTL_SECS", 300)?);
        config.sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(config)
    }

    /// Use a different session key header.
    #[must_use]
    pub fn with_session_header(mut self, header: impl Into<String>) -> Self {
        self.session_header = header.into();
        self
    }

    /// Set the identity bootstrap timeout.
    #[must_use]
    pub const fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the read retry policy.
    #[must_use]
    pub const fn with_read_retry(mut self, attempts: u32, base: Duration) -> Self {
        self.read_retry_attempts = attempts;
        self.read_retry_base = base;
        self
    }

    /// Set how long learned stock ceilings stay valid.
    #[must_use]
    pub const fn with_stock_ttl(mut self, ttl: Duration) -> Self {
        self.stock_ttl = ttl;
        self
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable parsed into `T`, falling back to a default.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_appends_trailing_slash() {
        let config = CartClientConfig::new(Url::parse("https://shop.example.com/api").unwrap());
        assert_eq!(config.base_url.as_str(), "https://shop.example.com/api/");
        assert_eq!(
            config.base_url.join("cart/current").unwrap().as_str(),
            "https://shop.example.com/api/cart/current"
        );
    }

    #[test]
    fn test_defaults() {
        let config = CartClientConfig::new(Url::parse("http://localhost:8000/").unwrap());
        assert_eq!(config.session_header, DEFAULT_SESSION_HEADER);
        assert_eq!(config.read_retry_attempts, 3);
        assert_eq!(config.bootstrap_timeout, Duration::from_secs(10));
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let config = CartClientConfig::new(Url::parse("http://localhost:8000/").unwrap())
            .with_session_header("X-Guest")
            .with_read_retry(1, Duration::from_millis(5))
            .with_bootstrap_timeout(Duration::from_millis(50));
        assert_eq!(config.session_header, "X-Guest");
        assert_eq!(config.read_retry_attempts, 1);
        assert_eq!(config.bootstrap_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_debug_redacts_access_token() {
        let mut config = CartClientConfig::new(Url::parse("http://localhost:8000/").unwrap());
        config.access_token = Some(SecretString::from("super_secret_bearer_token"));

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("localhost:8000"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_bearer_token"));
    }
}
