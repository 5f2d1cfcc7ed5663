//! Retrying, timeout-bounded, circuit-protected request wrapper.
//!
//! Layering, outermost first:
//!
//! 1. response cache (GET only, 2xx only)
//! 2. retry with backoff, for network-level failures only
//! 3. circuit breaker, which counts network failures and 5xx responses
//! 4. per-attempt timeout around the transport call
//!
//! A response that arrives with a non-2xx status is raised as an APIError
//! straight away; only failures to get any response are retried.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vigil_common::resilience::policies::PredicateRetry;
use vigil_common::{
    AppError, AppResult, CircuitBreaker, CircuitBreakerStatus, ErrorKind, NetworkFailure,
    RetryError, RetryExecutor,
};
use vigil_core::{HealthCheck, SharedMonitor};

use super::auth::AccessTokenProvider;
use super::cache::ResponseCache;
use super::options::{ClientConfig, RequestOptions};
use crate::http::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};

/// Characters of a failed response body kept in the error message.
const BODY_EXCERPT_LIMIT: usize = 200;

/// HTTP client with retry, timeout, circuit breaking and optional caching.
///
/// ```rust,no_run
/// use vigil_infra::client::{ClientConfig, ResilientClient};
///
/// # async fn run() -> vigil_common::AppResult<()> {
/// let config = ClientConfig::builder().base_url("https://api.example.com").build()?;
/// let client = ResilientClient::new(config)?;
/// let status: serde_json::Value = client.get("/status").await?;
/// # Ok(())
/// # }
/// ```
pub struct ResilientClient<T: Transport = ReqwestTransport> {
    config: ClientConfig,
    transport: Arc<T>,
    breaker: Option<CircuitBreaker<HttpResponse>>,
    cache: Option<ResponseCache>,
    auth: Option<Arc<dyn AccessTokenProvider>>,
    monitor: Option<SharedMonitor>,
}

impl ResilientClient<ReqwestTransport> {
    /// Client over a `reqwest` transport configured from `config`.
    pub fn new(config: ClientConfig) -> AppResult<Self> {
        let mut builder = ReqwestTransport::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let transport = builder.build().map_err(|err| {
            AppError::configuration("client.transport", "failed to build HTTP transport")
                .with_cause(err)
        })?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> ResilientClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> AppResult<Self> {
        config.validate()?;
        let breaker = config
            .circuit_breaker
            .clone()
            .map(|breaker| CircuitBreaker::new(config.base_url.clone(), breaker))
            .transpose()?;
        let cache = config.cache.enabled.then(|| ResponseCache::new(&config.cache));

        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout.as_millis() as u64,
            retry_attempts = config.retry_attempts,
            circuit_breaker = breaker.is_some(),
            cache = cache.is_some(),
            "resilient_client_created"
        );

        Ok(Self { config, transport: Arc::new(transport), breaker, cache, auth: None, monitor: None })
    }

    /// Attach a bearer token to every attempt.
    pub fn with_auth(mut self, auth: Arc<dyn AccessTokenProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Record every raised error in `monitor`.
    pub fn with_monitor(mut self, monitor: SharedMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn breaker_status(&self) -> Option<CircuitBreakerStatus> {
        self.breaker.as_ref().map(CircuitBreaker::get_status)
    }

    /// Drop the cached response for `path`, if any.
    pub fn invalidate_cache(&self, path: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(&self.url_for(path));
        }
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> AppResult<R> {
        self.request(path, RequestOptions::get()).await
    }

    /// POST `body` as JSON. Retries are disabled since the call may not be
    /// idempotent.
    pub async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AppResult<R> {
        let body = match serde_json::to_value(body) {
            Ok(body) => body,
            Err(err) => {
                let err = AppError::validation("body", "failed to serialize request body")
                    .with_cause(err);
                self.record(&err).await;
                return Err(err);
            }
        };
        self.request(path, RequestOptions::post(body)).await
    }

    /// Send a request and decode its JSON payload.
    ///
    /// 204 and 205 responses decode from JSON `null`, so `()` and `Option<_>`
    /// are valid targets.
    #[instrument(skip_all, fields(method = %options.method, path = %path))]
    pub async fn request<R: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> AppResult<R> {
        let url = self.url_for(path);
        let result = match self.dispatch(&url, path, &options).await {
            Ok((response, from_cache)) => decode::<R>(path, &response).inspect(|_| {
                if !from_cache && is_cacheable(&options) {
                    if let Some(cache) = &self.cache {
                        cache.insert(&url, response.status, &response.body);
                    }
                }
            }),
            Err(err) => Err(err),
        };

        match &result {
            Ok(_) => debug!(path, "request_succeeded"),
            Err(err) => {
                warn!(path, kind = %err.kind(), error = %err, "request_failed");
                self.record(err).await;
            }
        }
        result
    }

    /// Whether `path` currently answers with a 2xx status. No retries, no
    /// cache, nothing recorded.
    pub async fn probe(&self, path: &str) -> bool {
        let options = RequestOptions::get().no_retry().bypass_cache();
        self.dispatch(&self.url_for(path), path, &options).await.is_ok()
    }

    async fn dispatch(
        &self,
        url: &str,
        path: &str,
        options: &RequestOptions,
    ) -> AppResult<(HttpResponse, bool)> {
        options.validate()?;

        if is_cacheable(options) {
            if let Some(hit) = self.cache.as_ref().and_then(|cache| cache.get(url)) {
                debug!(url, "response_cache_hit");
                return Ok((HttpResponse::new(hit.status, hit.body.clone()), true));
            }
        }

        let retry_attempts = options.retry_attempts.unwrap_or(self.config.retry_attempts);
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let executor = RetryExecutor::new(
            self.config.retry_config(retry_attempts),
            PredicateRetry::new(|err: &AppError, _attempt| is_transient_network_failure(err)),
        );

        let response = match executor.execute(|| self.attempt(url, path, options, timeout)).await {
            Ok(response) => response,
            Err(RetryError::Exhausted { attempts, last }) if attempts > 1 => {
                return Err(AppError::retries_exhausted(attempts, last).with_context("endpoint", path));
            }
            Err(err) => return Err(err.into_inner()),
        };

        if !response.is_success() {
            return Err(api_error(path, &response));
        }
        Ok((response, false))
    }

    async fn attempt(
        &self,
        url: &str,
        path: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> AppResult<HttpResponse> {
        let mut request = HttpRequest::new(options.method.clone(), url, timeout)
            .header("accept", "application/json");
        if let Some(auth) = &self.auth {
            let token = auth.access_token().await?;
            request = request.header("authorization", format!("Bearer {token}"));
        }
        for (key, value) in &options.headers {
            request = request.header(key.clone(), value.clone());
        }
        if let Some(body) = &options.body {
            request = request.json(body.clone());
        }

        match &self.breaker {
            Some(breaker) => breaker.execute(|| self.send_bounded(request, path, timeout)).await,
            None => self.send_bounded(request, path, timeout).await,
        }
    }

    /// One transport call under `timeout`. 5xx responses are returned as
    /// errors so the breaker counts them; other statuses pass through.
    async fn send_bounded(
        &self,
        request: HttpRequest,
        path: &str,
        timeout: Duration,
    ) -> AppResult<HttpResponse> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(AppError::from(err).with_context("endpoint", path)),
            Err(_) => return Err(AppError::timeout(timeout).with_context("endpoint", path)),
        };
        if response.status >= 500 {
            return Err(api_error(path, &response));
        }
        Ok(response)
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }

    async fn record(&self, err: &AppError) {
        if let Some(monitor) = &self.monitor {
            monitor.record_error(err).await;
        }
    }
}

impl<T: Transport + 'static> ResilientClient<T> {
    /// Health check answering whether `path` responds with 2xx.
    pub fn health_check<N: Into<String>, P: Into<String>>(
        self: &Arc<Self>,
        name: N,
        path: P,
    ) -> HealthCheck {
        let client = Arc::clone(self);
        let path: Arc<str> = Arc::from(path.into());
        HealthCheck::new(name, move || {
            let client = Arc::clone(&client);
            let path = Arc::clone(&path);
            async move { client.probe(&path).await }
        })
    }
}

impl<T: Transport> std::fmt::Debug for ResilientClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("base_url", &self.config.base_url)
            .field("breaker", &self.breaker_status())
            .field("cache", &self.cache)
            .field("auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

fn is_cacheable(options: &RequestOptions) -> bool {
    options.method == Method::GET && !options.bypass_cache
}

fn is_transient_network_failure(err: &AppError) -> bool {
    err.kind() == ErrorKind::Network
        && err.network_failure() != Some(NetworkFailure::RetriesExhausted)
}

fn api_error(path: &str, response: &HttpResponse) -> AppError {
    let excerpt = response.body_excerpt(BODY_EXCERPT_LIMIT);
    let message = if excerpt.is_empty() {
        format!("{path} returned status {}", response.status)
    } else {
        format!("{path} returned status {}: {excerpt}", response.status)
    };
    let err = AppError::api(response.status, path, message);
    match response.header("retry-after").and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(secs) => err.with_context("retry_after_ms", secs.saturating_mul(1000).to_string()),
        None => err,
    }
}

fn decode<R: DeserializeOwned>(path: &str, response: &HttpResponse) -> AppResult<R> {
    if response.status == 204 || response.status == 205 {
        return serde_json::from_value(serde_json::Value::Null)
            .map_err(|err| AppError::malformed_payload(path, err));
    }
    serde_json::from_slice(&response.body).map_err(|err| AppError::malformed_payload(path, err))
}
