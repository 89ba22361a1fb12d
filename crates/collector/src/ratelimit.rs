//! Rate-limit tracking and backoff decisions

use crate::client::GithubClient;
use crate::{ClientError, Result};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_RATE_LIMIT_THRESHOLD: u32 = 100;

/// Extra wait past the advertised reset time
const RESET_BUFFER: Duration = Duration::from_secs(5);

/// Upstream quota snapshot from the last response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimit {
    /// Whether any response has reported a limit yet
    pub fn is_known(&self) -> bool {
        self.limit > 0
    }

    pub fn is_exhausted(&self) -> bool {
        self.is_known() && self.remaining == 0
    }

    /// Exhausted and the reset is still ahead. A snapshot whose reset has
    /// passed (or is unknown) no longer blocks requests.
    pub fn is_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        self.is_exhausted() && !self.time_until_reset(now).is_zero()
    }

    pub fn is_below(&self, threshold: u32) -> bool {
        self.is_known() && self.remaining < threshold
    }

    /// Time left until `reset`; zero when unknown or already past
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        self.reset
            .and_then(|reset| (reset - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Called with the remaining quota and reset time when below the threshold
pub type RateLimitWarning = Arc<dyn Fn(u32, Option<DateTime<Utc>>) + Send + Sync>;

/// How the client reacts to a shrinking quota
#[derive(Clone)]
pub struct RateLimitOptions {
    /// Remaining requests below which warnings fire; 0 means the default
    pub threshold: u32,
    /// Block until reset instead of failing fast when exhausted
    pub wait_on_exhaustion: bool,
    pub on_warning: Option<RateLimitWarning>,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RATE_LIMIT_THRESHOLD,
            wait_on_exhaustion: false,
            on_warning: None,
        }
    }
}

impl std::fmt::Debug for RateLimitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitOptions")
            .field("threshold", &self.threshold)
            .field("wait_on_exhaustion", &self.wait_on_exhaustion)
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

impl RateLimitOptions {
    pub(crate) fn sanitized(mut self) -> Self {
        if self.threshold == 0 {
            self.threshold = DEFAULT_RATE_LIMIT_THRESHOLD;
        }
        self
    }
}

impl GithubClient {
    /// Current rate-limit snapshot
    pub fn rate_limit_info(&self) -> RateLimit {
        *self.rate_limit.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rate_limit_options(&self) -> RateLimitOptions {
        self.rate_limit_opts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_rate_limit_options(&self, opts: RateLimitOptions) {
        *self.rate_limit_opts.write().unwrap_or_else(PoisonError::into_inner) = opts.sanitized();
    }

    /// True when the remaining quota is below the configured threshold
    pub fn should_backoff(&self) -> bool {
        let threshold = self.rate_limit_options().threshold;
        self.rate_limit_info().is_below(threshold)
    }

    /// Quota used up and not yet reset
    pub fn is_rate_limit_exhausted(&self) -> bool {
        self.rate_limit_info().is_exhausted_at(Utc::now())
    }

    pub fn time_until_reset(&self) -> Duration {
        self.rate_limit_info().time_until_reset(Utc::now())
    }

    /// Sleep until the quota resets (plus a small buffer) or `cancel` fires.
    /// Returns immediately when the quota is not exhausted.
    pub async fn wait_for_reset(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.is_rate_limit_exhausted() {
            return Ok(());
        }

        let wait = self.time_until_reset();
        if wait.is_zero() {
            return Ok(());
        }
        let wait = wait + RESET_BUFFER;

        info!(wait_secs = wait.as_secs(), "Waiting for GitHub rate limit reset");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Gate run before every request
    pub(crate) async fn check_rate_limit(&self, cancel: &CancellationToken) -> Result<()> {
        let opts = self.rate_limit_options();
        let current = self.rate_limit_info();

        if current.is_below(opts.threshold) {
            warn!(
                remaining = current.remaining,
                limit = current.limit,
                reset = ?current.reset,
                "GitHub rate limit running low"
            );
            if let Some(hook) = &opts.on_warning {
                hook(current.remaining, current.reset);
            }
        }

        if current.is_exhausted_at(Utc::now()) {
            if opts.wait_on_exhaustion {
                self.wait_for_reset(cancel).await?;
            } else {
                return Err(ClientError::RateLimited { reset: current.reset });
            }
        }

        Ok(())
    }

    /// Record the quota headers of a response
    pub(crate) fn update_rate_limit(&self, headers: &HeaderMap) {
        let mut rate_limit = self.rate_limit.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(limit) = header_number::<u32>(headers, "x-ratelimit-limit") {
            rate_limit.limit = limit;
        }
        if let Some(remaining) = header_number::<u32>(headers, "x-ratelimit-remaining") {
            rate_limit.remaining = remaining;
        }
        if let Some(reset) = parse_reset(headers) {
            rate_limit.reset = Some(reset);
        }
    }
}

pub(crate) fn parse_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    header_number::<i64>(headers, "x-ratelimit-reset")
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use reqwest::header::HeaderValue;

    fn headers(limit: &str, remaining: &str, reset: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("x-ratelimit-limit", HeaderValue::from_str(limit).unwrap());
        map.insert("x-ratelimit-remaining", HeaderValue::from_str(remaining).unwrap());
        map.insert("x-ratelimit-reset", HeaderValue::from_str(reset).unwrap());
        map
    }

    fn client() -> GithubClient {
        GithubClient::new(crate::ClientConfig::with_token("ghp_test")).unwrap()
    }

    #[test]
    fn unknown_limit_never_backs_off() {
        let rl = RateLimit::default();
        assert!(!rl.is_below(100));
        assert!(!rl.is_exhausted());
        assert_eq!(rl.time_until_reset(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn past_reset_is_zero_wait() {
        let now = Utc::now();
        let rl = RateLimit {
            limit: 5000,
            remaining: 0,
            reset: Some(now - TimeDelta::minutes(1)),
        };
        assert!(rl.is_exhausted());
        assert!(!rl.is_exhausted_at(now));
        assert_eq!(rl.time_until_reset(now), Duration::ZERO);
    }

    #[test]
    fn exhaustion_lasts_until_reset() {
        let now = Utc::now();
        let rl = RateLimit {
            limit: 5000,
            remaining: 0,
            reset: Some(now + TimeDelta::minutes(10)),
        };
        assert!(rl.is_exhausted_at(now));
        assert!(!rl.is_exhausted_at(now + TimeDelta::minutes(11)));

        let unknown_reset = RateLimit { reset: None, ..rl };
        assert!(!unknown_reset.is_exhausted_at(now));
    }

    #[test]
    fn headers_update_state() {
        let client = client();
        client.update_rate_limit(&headers("5000", "42", "1900000000"));

        let rl = client.rate_limit_info();
        assert_eq!(rl.limit, 5000);
        assert_eq!(rl.remaining, 42);
        assert_eq!(rl.reset.map(|r| r.timestamp()), Some(1_900_000_000));
        assert!(client.should_backoff());
        assert!(!client.is_rate_limit_exhausted());
    }

    #[test]
    fn malformed_headers_are_ignored() {
        let client = client();
        client.update_rate_limit(&headers("5000", "4000", "1900000000"));
        client.update_rate_limit(&headers("lots", "-", "soon"));

        let rl = client.rate_limit_info();
        assert_eq!(rl.limit, 5000);
        assert_eq!(rl.remaining, 4000);
        assert!(!client.should_backoff());
    }

    #[test]
    fn zero_threshold_falls_back_to_default() {
        let client = client();
        client.set_rate_limit_options(RateLimitOptions {
            threshold: 0,
            ..Default::default()
        });
        assert_eq!(client.rate_limit_options().threshold, DEFAULT_RATE_LIMIT_THRESHOLD);
    }

    #[tokio::test]
    async fn exhausted_quota_fails_fast() {
        let client = client();
        let reset = (Utc::now() + TimeDelta::hours(1)).timestamp().to_string();
        client.update_rate_limit(&headers("5000", "0", &reset));

        let err = client.check_rate_limit(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::RateLimited { reset: Some(_) }));
    }

    #[tokio::test]
    async fn wait_for_reset_honours_cancellation() {
        let client = client();
        let reset = (Utc::now() + TimeDelta::hours(1)).timestamp().to_string();
        client.update_rate_limit(&headers("5000", "0", &reset));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = client.wait_for_reset(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn warning_hook_fires_below_threshold() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let client = client();
        let seen = Arc::new(AtomicU32::new(u32::MAX));
        let sink = seen.clone();
        client.set_rate_limit_options(RateLimitOptions {
            threshold: 100,
            wait_on_exhaustion: false,
            on_warning: Some(Arc::new(move |remaining, _| sink.store(remaining, Ordering::SeqCst))),
        });
        client.update_rate_limit(&headers("5000", "7", "1900000000"));

        client.check_rate_limit(&CancellationToken::new()).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
