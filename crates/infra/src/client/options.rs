//! Client configuration and per-request overrides.

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use vigil_common::utils::serde::option_duration_millis;
use vigil_common::{duration_millis, AppError, AppResult, BackoffStrategy, RetryConfig};
use vigil_common::CircuitBreakerConfig;

/// TTL cache for successful GET responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(with = "duration_millis")]
    pub ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: false, ttl: Duration::from_secs(60), max_entries: 1000 }
    }
}

/// Configuration for [`ResilientClient`](super::ResilientClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix joined with every request path
    pub base_url: String,
    /// Budget for one attempt, including reading the body
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Additional attempts after a network-level failure
    pub retry_attempts: u32,
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    pub backoff: BackoffStrategy,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub user_agent: Option<String>,
    pub cache: CacheConfig,
    /// Embedded breaker; `None` disables it
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            backoff: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(30),
            user_agent: Some(concat!("vigil/", env!("CARGO_PKG_VERSION")).to_string()),
            cache: CacheConfig::default(),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Retry settings for a request making up to `retry_attempts + 1` tries.
    pub fn retry_config(&self, retry_attempts: u32) -> RetryConfig {
        RetryConfig {
            retry_attempts,
            retry_delay: self.retry_delay,
            backoff: self.backoff,
            max_delay: self.max_delay.max(self.retry_delay),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(AppError::configuration("client.base_url", "base_url must not be empty"));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AppError::configuration(
                "client.base_url",
                format!("base_url must start with http:// or https://, got '{base}'"),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AppError::configuration("client.timeout", "timeout must be greater than 0"));
        }
        if self.cache.enabled && (self.cache.ttl.is_zero() || self.cache.max_entries == 0) {
            return Err(AppError::configuration(
                "client.cache",
                "an enabled cache needs a ttl and max_entries greater than 0",
            ));
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        self.retry_config(self.retry_attempts).validate()
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn linear_backoff(mut self) -> Self {
        self.config.backoff = BackoffStrategy::Linear;
        self
    }

    pub fn exponential_backoff(mut self, max_delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Exponential;
        self.config.max_delay = max_delay;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(agent.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.enabled = true;
        self.config.cache.ttl = ttl;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = Some(config);
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.config.circuit_breaker = None;
        self
    }

    pub fn build(self) -> AppResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-request overrides of the client defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    #[serde(with = "method_name")]
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    #[serde(with = "option_duration_millis")]
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub bypass_cache: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            timeout: None,
            retry_attempts: None,
            bypass_cache: false,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    /// POST with a JSON body; retries are disabled.
    pub fn post(body: serde_json::Value) -> Self {
        Self { method: Method::POST, body: Some(body), retry_attempts: Some(0), ..Self::default() }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn no_retry(self) -> Self {
        self.retry_attempts(0)
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Reject overrides no request could succeed with.
    pub fn validate(&self) -> AppResult<()> {
        if self.timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(AppError::validation(
                "timeout",
                "request timeout must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

mod method_name {
    use reqwest::Method;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &Method, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Method, D::Error> {
        let name = String::deserialize(deserializer)?;
        Method::from_bytes(name.to_ascii_uppercase().as_bytes()).map_err(serde::de::Error::custom)
    }
}
