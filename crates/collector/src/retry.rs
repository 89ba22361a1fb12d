//! Retry with exponential backoff and jitter

use crate::client::GithubClient;
use crate::{ClientError, Result};
use rand::Rng;
use reqwest::{RequestBuilder, Response};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Called before each wait with the attempt number, the error that
/// triggered it and the chosen delay
pub type RetryHook = Arc<dyn Fn(u32, &ClientError, Duration) + Send + Sync>;

#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 means the default
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub on_retry: Option<RetryHook>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryConfig {
    pub(crate) fn sanitized(mut self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.base_delay.is_zero() {
            self.base_delay = DEFAULT_BASE_DELAY;
        }
        if self.max_delay.is_zero() {
            self.max_delay = DEFAULT_MAX_DELAY;
        }
        self
    }
}

/// 429 and the gateway-ish 5xx family
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// `min(base * 2^(attempt-1), max)`, jittered by up to 25% either way
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(1u32 << exponent).min(max);

    let factor = rand::rng().random_range(0.75..=1.25);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
}

impl GithubClient {
    pub fn retry_config(&self) -> RetryConfig {
        self.retry_config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_retry_config(&self, config: RetryConfig) {
        *self.retry_config.write().unwrap_or_else(PoisonError::into_inner) = config.sanitized();
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Retryable statuses and transport errors are repeated up to
    /// `max_retries` times; any other response is returned as-is after one
    /// attempt. A request with a streaming body is rejected up front since
    /// it cannot be replayed.
    pub async fn execute_with_retry(
        &self,
        cancel: &CancellationToken,
        request: RequestBuilder,
    ) -> Result<Response> {
        let template = request.build()?;
        if template.try_clone().is_none() {
            return Err(ClientError::NonReplayableBody);
        }

        let config = self.retry_config();
        let mut attempt = 0;

        loop {
            let request = template.try_clone().ok_or(ClientError::NonReplayableBody)?;

            let err = match self.send(cancel, request).await {
                Ok(response) if is_retryable_status(response.status().as_u16()) => {
                    ClientError::Status(response.status().as_u16())
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if attempt >= config.max_retries {
                return Err(ClientError::MaxRetriesExceeded(Box::new(err)));
            }
            attempt += 1;

            let delay = backoff_delay(attempt, config.base_delay, config.max_delay);
            if let Some(hook) = &config.on_retry {
                hook(attempt, &err, delay);
            }
            warn!(
                attempt,
                max_retries = config.max_retries,
                delay_ms = delay.as_millis() as u64,
                url = %template.url(),
                error = %err,
                "Retrying GitHub request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        for _ in 0..50 {
            let first = backoff_delay(1, base, max);
            assert!(first >= Duration::from_millis(750) && first <= Duration::from_millis(1250));

            let third = backoff_delay(3, base, max);
            assert!(third >= Duration::from_millis(3000) && third <= Duration::from_millis(5000));

            let capped = backoff_delay(20, base, max);
            assert!(
                capped >= Duration::from_millis(22_500) && capped <= Duration::from_millis(37_500)
            );
        }
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let delay = backoff_delay(u32::MAX, Duration::from_secs(1), Duration::from_secs(30));
        assert!(delay <= Duration::from_millis(37_500));
    }

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status} should retry");
        }
        for status in [200, 304, 400, 401, 403, 404, 422, 501] {
            assert!(!is_retryable_status(status), "{status} should not retry");
        }
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config = RetryConfig {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            on_retry: None,
        }
        .sanitized();

        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.base_delay, DEFAULT_BASE_DELAY);
        assert_eq!(config.max_delay, DEFAULT_MAX_DELAY);
    }
}
