//! HTTP client for the inventory backend.
//!
//! Wraps `reqwest` with authentication, an optional client-side request
//! budget, and bounded retries for transport failures and 5xx answers.
//! Only a 2xx answer is ever decoded, so an error page is never mistaken
//! for inventory data.

use crate::traits::{AuthConfig, ConnectorConfig, ConnectorError, ConnectorResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Characters of a response body kept in error messages.
const BODY_EXCERPT: usize = 300;

/// Client-side request budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per second.
    pub requests_per_second: u32,
    /// Burst allowance on top of the steady rate.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 5,
        }
    }
}

impl RateLimitConfig {
    fn limiter(&self) -> ConnectorResult<DirectLimiter> {
        let rate = NonZeroU32::new(self.requests_per_second).ok_or_else(|| {
            ConnectorError::ConfigError("requests_per_second must be > 0".into())
        })?;
        let burst = NonZeroU32::new(self.burst_size).unwrap_or(NonZeroU32::MIN);
        Ok(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
    }
}

/// Exponential backoff between attempts, capped, with a little jitter.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    fn delay(&self, retry: u32, salt: &str) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(factor) + jitter(salt, retry);
        delay.min(self.cap)
    }
}

/// What to do with an answer from the backend.
enum Outcome {
    Done(Response),
    Retry(ConnectorError),
    Fail(ConnectorError),
}

/// HTTP client with retry and rate limiting support.
pub struct HttpClient {
    client: Client,
    config: ConnectorConfig,
    limiter: Option<Arc<DirectLimiter>>,
    backoff: Backoff,
}

impl HttpClient {
    /// Creates a client from connector configuration.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        Self::with_rate_limit(config, None)
    }

    /// Creates a client that waits for the request budget before each call.
    pub fn with_rate_limit(
        config: ConnectorConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> ConnectorResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ConnectorError::ConfigError("base_url is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers(&config))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let limiter = rate_limit
            .map(|rl| rl.limiter().map(Arc::new))
            .transpose()?;

        Ok(Self {
            client,
            config,
            limiter,
            backoff: Backoff::default(),
        })
    }

    /// Joins `path` onto the base URL with exactly one slash.
    pub fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// GETs `path` and decodes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        self.get_json_with_query(path, &[]).await
    }

    /// GETs `path` with query parameters and decodes the JSON body.
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ConnectorResult<T> {
        let mut request = self.client.get(self.build_url(path));
        if !query.is_empty() {
            request = request.query(query);
        }
        decode(self.send(path, request).await?).await
    }

    /// POSTs `body` as JSON to `path` and decodes the JSON answer.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<R> {
        let request = self.client.post(self.build_url(path)).json(body);
        decode(self.send(path, request).await?).await
    }

    /// Sends a single authenticated GET and reports the status code.
    pub async fn probe(&self, path: &str) -> ConnectorResult<StatusCode> {
        let request = self.authorize(self.client.get(self.build_url(path)));
        let response = request.send().await.map_err(transport_error)?;
        Ok(response.status())
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> ConnectorResult<Response> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let request = self.authorize(request);
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = ConnectorError::Internal(format!("No attempt made for {}", path));

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt, path);
                debug!(path, attempt, ?delay, "Retrying inventory request");
                tokio::time::sleep(delay).await;
            }

            let Some(request) = request.try_clone() else {
                return Err(ConnectorError::Internal(
                    "Request body cannot be replayed".to_string(),
                ));
            };

            let outcome = match request.send().await {
                Ok(response) => classify(response).await,
                Err(e) => Outcome::Retry(transport_error(e)),
            };
            match outcome {
                Outcome::Done(response) => return Ok(response),
                Outcome::Fail(error) => return Err(error),
                Outcome::Retry(error) => {
                    warn!(path, attempt, error = %error, "Inventory request failed");
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            AuthConfig::None => request,
            AuthConfig::ApiKey { key, header_name } => {
                request.header(header_name.as_str(), key.expose_secret())
            }
            AuthConfig::BearerToken { token } => {
                request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            }
        }
    }
}

fn default_headers(config: &ConnectorConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        let name = HeaderName::try_from(key.as_str());
        let value = HeaderValue::try_from(value.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %key, "Skipping invalid default header"),
        }
    }
    headers
}

/// Sorts an answer into success, retryable failure or final failure.
async fn classify(response: Response) -> Outcome {
    let status = response.status();
    if status.is_success() {
        return Outcome::Done(response);
    }
    if status.is_server_error() {
        return Outcome::Retry(ConnectorError::RequestFailed(format!(
            "Inventory backend answered {}",
            status
        )));
    }

    let error = match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            ConnectorError::RateLimited(retry_after)
        }
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed("Unauthorized".into()),
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationDenied("Forbidden".into()),
        StatusCode::NOT_FOUND => ConnectorError::NotFound(response.url().path().to_string()),
        _ => {
            let body = response.text().await.unwrap_or_default();
            ConnectorError::RequestFailed(format!(
                "Unexpected status {}: {}",
                status,
                excerpt(&body)
            ))
        }
    };
    Outcome::Fail(error)
}

async fn decode<T: DeserializeOwned>(response: Response) -> ConnectorResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&body).map_err(|e| {
        ConnectorError::InvalidResponse(format!(
            "Undecodable body (status {}): {}: {}",
            status,
            e,
            excerpt(&body)
        ))
    })
}

fn transport_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout(e.to_string())
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed(e.to_string())
    } else {
        ConnectorError::RequestFailed(e.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT).collect()
}

/// Up to 50ms, varying by path, attempt and clock.
fn jitter(salt: &str, retry: u32) -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    salt.hash(&mut hasher);
    retry.hash(&mut hasher);
    std::time::Instant::now().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % 50)
}
