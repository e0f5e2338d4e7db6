//! Throttled, retrying HTTP executor shared by the API clients.

use std::time::Duration;

use odsync_core::error::{ApiErrorDetails, ApiErrorKind};
use odsync_core::{AppError, HttpConfig, Throttle};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::time::sleep;

/// Sends requests through the shared [`Throttle`], with a per-call timeout and
/// bounded retries.
///
/// Network failures, timeouts, 429 and 5xx responses are retried with exponential
/// backoff (or the `Retry-After` delay when the server sends one). Other non-success
/// statuses are returned at once as [`AppError::Api`].
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    throttle: Throttle,
    config: HttpConfig,
}

impl HttpExecutor {
    /// Maximum backoff delay between two attempts.
    const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(config: HttpConfig, throttle: Throttle) -> Result<Self, AppError> {
        // Proxies come from HTTPS_PROXY / https_proxy, which reqwest reads by default.
        let client = Client::builder()
            .user_agent(concat!("odsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            throttle,
            config,
        })
    }

    /// Sends the request built by `build`, retrying transient failures.
    ///
    /// `build` is called once per attempt, so bodies that cannot be cloned (multipart
    /// forms) are rebuilt each time.
    pub async fn send<F>(&self, build: F) -> Result<Response, AppError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            self.throttle.acquire().await;

            let (error, retry_after) = match build(&self.client).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let retry_after = retry_after(&resp);
                    (api_error(resp).await, retry_after)
                }
                Err(e) => (self.classify(e), None),
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt == attempts {
                return Err(match &error {
                    AppError::Api(details) if details.kind == ApiErrorKind::RateLimit => {
                        AppError::RateLimitExceeded
                    }
                    _ => error,
                });
            }

            let delay = retry_after.unwrap_or_else(|| self.backoff(attempt));
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );
            sleep(delay).await;
        }

        Err(AppError::Generic("No attempts made".to_string()))
    }

    /// Exponential backoff: base, 2 x base, 4 x base... capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .retry_base_delay
            .saturating_mul(factor)
            .min(Self::MAX_RETRY_DELAY)
    }

    fn classify(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.config.timeout.as_secs())
        } else if e.is_connect() || e.is_request() {
            AppError::NetworkError(e.to_string())
        } else {
            AppError::ClientError(e.to_string())
        }
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    if resp.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .map(|d| d.min(HttpExecutor::MAX_RETRY_DELAY))
}

async fn api_error(resp: Response) -> AppError {
    let status = resp.status().as_u16();
    let endpoint = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    AppError::Api(ApiErrorDetails::new(status, endpoint, body.trim()))
}

/// Decodes a JSON body, mapping failures to `AppError::ClientError`.
pub(crate) async fn json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, AppError> {
    resp.json()
        .await
        .map_err(|e| AppError::ClientError(format!("Invalid response body: {}", e)))
}
