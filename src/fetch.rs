//! Resilient JSON fetcher for the remote assessment API.
//!
//! One logical GET = up to `max_attempts` transport attempts. Every attempt
//! is classified by [`classify`] (kept pure so the policy is testable without
//! a network), and only transient outcomes are retried:
//!
//! - Network/transport failure (connect, timeout, DNS, TLS) → retry
//! - HTTP 429 → retry after the `Retry-After` hint (integer seconds, else 10s)
//! - Any other status ≥ 400 → retry
//! - Body not parseable as JSON → retry
//!
//! The remote reports still-running scans through error statuses, so client
//! errors cannot be separated from "in progress" by status alone and are
//! retried like server errors.
//!
//! # Backoff
//!
//! Exponential between attempts: 1s, 2s, 4s, ... capped at 60s. A 429 with a
//! usable `Retry-After` replaces the scheduled backoff for that retry.
//!
//! Exhausting the attempt budget surfaces the last transient reason as a
//! terminal error; the fetcher never retries forever.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::config::ApiConfig;

/// Sleep applied to a 429 that carries no usable `Retry-After` header.
const DEFAULT_THROTTLE_DELAY: Duration = Duration::from_secs(10);

/// Ceiling for the exponential backoff schedule.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("tls-harvest/", env!("CARGO_PKG_VERSION"));

/// Classified result of a single transport attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Parsed JSON payload, returned to the caller unchanged.
    Success(Value),
    /// Transient failure; retried while attempts remain.
    Retry {
        reason: String,
        /// Server-suggested sleep (429 only). Replaces the backoff schedule
        /// for the next retry when present.
        suggested_delay: Option<Duration>,
    },
}

/// Classify a completed HTTP response.
///
/// Transport-level failures never reach this function; the retry loop
/// classifies those as transient directly.
pub fn classify(status: StatusCode, retry_after: Option<&str>, body: &str) -> AttemptOutcome {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AttemptOutcome::Retry {
            reason: "rate limited (429)".to_string(),
            suggested_delay: Some(retry_after_delay(retry_after)),
        };
    }

    if status.as_u16() >= 400 {
        return AttemptOutcome::Retry {
            reason: format!("HTTP {}", status.as_u16()),
            suggested_delay: None,
        };
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => AttemptOutcome::Success(value),
        Err(e) => AttemptOutcome::Retry {
            reason: format!("invalid JSON response: {}", e),
            suggested_delay: None,
        },
    }
}

/// Sleep duration for a throttled response: the `Retry-After` value when it
/// parses as integer seconds, otherwise 10s.
pub fn retry_after_delay(header: Option<&str>) -> Duration {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_THROTTLE_DELAY)
}

/// Backoff before retry number `retry` (0-based): 1s doubling, capped at 60s.
pub fn backoff_delay(retry: u32) -> Duration {
    let secs = 1u64 << retry.min(6);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Issues one logical GET returning decoded JSON.
///
/// The trait seam lets orchestration code run against scripted fetchers in
/// tests; [`HttpFetcher`] is the real implementation.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// GET `<base>/<path>` with query parameters, masking transient failures
    /// behind retry. Returns the decoded JSON payload.
    async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value>;
}

/// HTTP fetcher with retry and backoff over a shared `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    max_attempts: u32,
}

impl HttpFetcher {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_attempts: config.max_attempts.max(1),
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        // Sleep carried into the next iteration: the 429 hint when the server
        // supplied one, otherwise the exponential schedule.
        let mut pending_delay: Option<Duration> = None;
        let mut last_reason = String::new();

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = pending_delay
                    .take()
                    .unwrap_or_else(|| backoff_delay(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.client.get(&url).query(&params).send().await {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    match response.text().await {
                        Ok(body) => classify(status, retry_after.as_deref(), &body),
                        Err(e) => AttemptOutcome::Retry {
                            reason: format!("failed to read response body: {}", e),
                            suggested_delay: None,
                        },
                    }
                }
                Err(e) => AttemptOutcome::Retry {
                    reason: format!("network error: {}", e),
                    suggested_delay: None,
                },
            };

            match outcome {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Retry {
                    reason,
                    suggested_delay,
                } => {
                    match suggested_delay {
                        Some(delay) => eprintln!(
                            "Warning: GET {}: {}, sleeping {}s before retry (attempt {}/{})",
                            url,
                            reason,
                            delay.as_secs(),
                            attempt + 1,
                            self.max_attempts
                        ),
                        None => eprintln!(
                            "Warning: GET {}: {} (attempt {}/{})",
                            url,
                            reason,
                            attempt + 1,
                            self.max_attempts
                        ),
                    }
                    pending_delay = suggested_delay;
                    last_reason = reason;
                }
            }
        }

        Err(anyhow!(
            "GET {} failed after {} attempts: {}",
            url,
            self.max_attempts,
            last_reason
        ))
    }
}
