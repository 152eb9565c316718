//! External platform access for background workers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ModqueueError, Result};
use crate::ratelimit::RateLimiter;
use crate::store::SubjectKind;

/// Rate limiter key for outbound platform calls.
pub const PLATFORM_RATE_KEY: &str = "platform";

/// What background workers need from the platform that hosts the subjects.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// The subset of `ids` the platform has already banned (users) or
    /// locked (groups).
    async fn banned_ids(&self, kind: SubjectKind, ids: &[i64]) -> Result<Vec<i64>>;
}

/// Wraps a platform client so every call first takes a rate limit slot.
pub struct RateLimitedApi<A> {
    inner: A,
    limiter: RateLimiter,
    cancel: CancellationToken,
}

impl<A: PlatformApi> RateLimitedApi<A> {
    /// `cancel` aborts a call that is still waiting for a slot.
    pub fn new(inner: A, limiter: RateLimiter, cancel: CancellationToken) -> Self {
        Self { inner, limiter, cancel }
    }
}

#[async_trait]
impl<A: PlatformApi> PlatformApi for RateLimitedApi<A> {
    async fn banned_ids(&self, kind: SubjectKind, ids: &[i64]) -> Result<Vec<i64>> {
        self.limiter.acquire(PLATFORM_RATE_KEY, &self.cancel).await?;
        self.inner.banned_ids(kind, ids).await
    }
}

#[derive(Serialize)]
struct BannedRequest<'a> {
    ids: &'a [i64],
}

#[derive(Deserialize)]
struct BannedResponse {
    banned: Vec<i64>,
}

/// JSON-over-HTTP platform client.
///
/// `POST {base_url}/{users|groups}/banned` with `{"ids": [...]}` answers
/// `{"banned": [...]}`.
pub struct HttpPlatformApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPlatformApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModqueueError::Platform(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, kind: SubjectKind) -> String {
        format!("{}/{}s/banned", self.base_url, kind.as_str())
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn banned_ids(&self, kind: SubjectKind, ids: &[i64]) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(self.endpoint(kind)).json(&BannedRequest { ids });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModqueueError::Platform(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModqueueError::Platform("Rate limited by platform".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModqueueError::Platform(format!("HTTP {}: {}", status, body)));
        }

        let body: BannedResponse = response
            .json()
            .await
            .map_err(|e| ModqueueError::Platform(format!("Invalid response: {}", e)))?;
        Ok(body.banned)
    }
}
