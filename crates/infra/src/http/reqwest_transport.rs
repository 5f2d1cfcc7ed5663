use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use tracing::debug;

use super::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Production [`Transport`] over a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    /// Wrap an already configured client.
    pub fn from_client(client: ReqwestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest { method, url, headers, body, timeout } = request;
        debug!(%method, %url, "sending HTTP request");

        let mut builder = self.client.request(method.clone(), &url).timeout(timeout);
        for (key, value) in headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|err| map_error(err, timeout))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|err| TransportError::Body(err.to_string()))?;

        debug!(%method, %url, status, "received HTTP response");
        Ok(HttpResponse { status, headers, body: body.to_vec() })
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }
    if err.is_builder() {
        return TransportError::InvalidRequest(err.to_string());
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        if err.is_connect() {
            return TransportError::Connect(err.to_string());
        }
    }
    if err.is_request() || err.is_body() {
        return TransportError::Connect(err.to_string());
    }
    TransportError::Other(err.to_string())
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
}

impl ReqwestTransportBuilder {
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, TransportError> {
        let mut builder = ReqwestClient::builder().no_proxy();
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|err| TransportError::Other(err.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}
