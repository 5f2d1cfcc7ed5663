//! Access token seam for authenticated requests.

use async_trait::async_trait;
use vigil_common::AppResult;

/// Supplies the bearer token attached to every request.
///
/// Called once per attempt, so an implementation that refreshes tokens can
/// hand out a new one on retry.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> AppResult<String>;
}

/// Provider returning a fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> AppResult<String> {
        Ok(self.0.clone())
    }
}
