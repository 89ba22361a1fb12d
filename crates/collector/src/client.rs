//! Authenticated GitHub REST client

use crate::ratelimit::{RateLimit, RateLimitOptions};
use crate::retry::RetryConfig;
use crate::{ClientConfig, ClientError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const MAX_ERROR_BODY: usize = 1024;

/// GitHub API client with shared rate-limit state
pub struct GithubClient {
    http: Client,
    base_url: String,
    pub(crate) rate_limit: RwLock<RateLimit>,
    pub(crate) rate_limit_opts: RwLock<RateLimitOptions>,
    pub(crate) retry_config: RwLock<RetryConfig>,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit_info())
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    /// Create a new GitHub client. The token must be non-empty after trimming.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingToken)?;

        let base_url = Url::parse(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            rate_limit: RwLock::new(RateLimit::default()),
            rate_limit_opts: RwLock::new(config.rate_limit.sanitized()),
            retry_config: RwLock::new(config.retry.sanitized()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request for a path relative to the API base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send one request: rate-limit gate, then the call, then header bookkeeping
    pub(crate) async fn send(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> Result<Response> {
        self.check_rate_limit(cancel).await?;
        self.send_unchecked(cancel, request).await
    }

    async fn send_unchecked(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> Result<Response> {
        debug!(method = %request.method(), url = %request.url(), "GitHub request");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            response = self.http.execute(request) => response?,
        };

        self.update_rate_limit(response.headers());
        Ok(response)
    }

    /// GET with retry; any status is returned as-is
    pub async fn get(&self, cancel: &CancellationToken, path: &str) -> Result<Response> {
        self.execute_with_retry(cancel, self.request(Method::GET, path))
            .await
    }

    /// GET and decode a JSON body, failing on anything but 200
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<T> {
        let response = self.get(cancel, path).await?;
        let response = ensure_ok(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Verify the token against `/rate_limit` and populate the rate-limit state
    pub async fn validate_token(&self, cancel: &CancellationToken) -> Result<RateLimit> {
        let request = self.request(Method::GET, "/rate_limit").build()?;
        let response = self.send_unchecked(cancel, request).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::InvalidToken);
        }
        ensure_ok(response).await?;

        Ok(self.rate_limit_info())
    }
}

/// Pass a 200 through; map anything else to a typed error
pub(crate) async fn ensure_ok(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    if status == StatusCode::FORBIDDEN && quota_exhausted(response.headers()) {
        return Err(ClientError::RateLimited {
            reset: crate::ratelimit::parse_reset(response.headers()),
        });
    }

    Err(api_error(response).await)
}

/// Build an `Api` error from a response, keeping the start of the body
pub(crate) async fn api_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.bytes().await.unwrap_or_default();
    let message = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY)]).into_owned();
    ClientError::Api { status, message }
}

fn quota_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .is_some_and(|remaining| remaining == "0")
}
