//! RepoVitals GitHub Collection
//!
//! A rate-limit aware GitHub REST client with retry and conditional request
//! support, a per-repository collector that tolerates partial failures, and
//! the batch scanner that turns successive observations into growth scores.

pub mod activity;
pub mod client;
pub mod collector;
pub mod conditional;
mod pagination;
pub mod ratelimit;
pub mod repo;
pub mod repository;
pub mod retry;
pub mod scanner;
pub mod search;

pub use activity::{ActivityError, ActivityMetrics, ReleaseInfo};
pub use client::GithubClient;
pub use collector::{
    CollectionResult, CollectionSummary, CollectorOptions, RepoCollector, RepoError, RepoErrorKind,
};
pub use conditional::{Conditional, ConditionalInfo, ConditionalResponse};
pub use ratelimit::{RateLimit, RateLimitOptions};
pub use repo::{dedup_repos, filter_excluded, ExclusionPattern, ParseError, RepoId};
pub use repository::RepoMetrics;
pub use retry::RetryConfig;
pub use scanner::{
    normalize_store, top_from_store, FailureReason, Normalization, ScanError, ScanFailure,
    ScanStatus, ScanSummary, Scanner,
};
pub use search::SearchResult;

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Rate limit exhausted, resets at {}", format_reset(.reset))]
    RateLimited { reset: Option<DateTime<Utc>> },

    #[error("Max retries exceeded: {0}")]
    MaxRetriesExceeded(Box<ClientError>),

    #[error("Request body cannot be replayed for retry")]
    NonReplayableBody,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("GitHub token cannot be empty")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

fn format_reset(reset: &Option<DateTime<Utc>>) -> String {
    reset.map_or_else(|| "unknown".to_string(), |r| r.to_rfc3339())
}

impl ClientError {
    /// HTTP status carried by this error, looking through retry exhaustion
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Status(status) => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::MaxRetriesExceeded(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::MaxRetriesExceeded(inner) => inner.is_rate_limit(),
            _ => self.status() == Some(429),
        }
    }

    /// 4xx other than 429; retrying will not help
    pub fn is_permanent(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status) && status != 429)
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::MaxRetriesExceeded(inner) => inner.is_cancelled(),
            _ => false,
        }
    }

    /// Transient failures the retry executor may repeat: retryable statuses
    /// and transport errors (connect, timeout, reset or truncated response)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(status) => retry::is_retryable_status(*status),
            Self::Http(e) => is_transport_error(e),
            _ => false,
        }
    }
}

/// Network-level failure, as opposed to building, redirecting or decoding
fn is_transport_error(e: &reqwest::Error) -> bool {
    if e.is_builder() || e.is_redirect() || e.is_status() || e.is_decode() {
        return false;
    }
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Configuration for the GitHub client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: Option<String>,
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub rate_limit: RateLimitOptions,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: std::env::var("GITHUB_TOKEN").ok(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: "repovitals/0.1 (https://github.com/repovitals/repovitals)".to_string(),
            timeout: Duration::from_secs(30),
            rate_limit: RateLimitOptions::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration with an explicit token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }
}
