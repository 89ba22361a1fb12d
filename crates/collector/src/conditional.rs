//! Conditional GET support (ETag / Last-Modified)

use crate::client::{ensure_ok, GithubClient};
use crate::repository::{RepoMetrics, RepoResponse};
use crate::Result;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Cache validators from a previous response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalInfo {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ConditionalInfo {
    pub fn new(etag: Option<String>, last_modified: Option<String>) -> Self {
        Self {
            etag: etag.filter(|v| !v.is_empty()),
            last_modified: last_modified.filter(|v| !v.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self::new(header(ETAG), header(LAST_MODIFIED))
    }
}

/// Raw outcome of a conditional GET
#[derive(Debug)]
pub struct ConditionalResponse {
    /// The server answered 304
    pub not_modified: bool,
    /// The response for anything other than 304
    pub response: Option<Response>,
    /// Validators carried by this response
    pub info: ConditionalInfo,
}

/// Decoded outcome of a conditional fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<T> {
    NotModified(ConditionalInfo),
    Modified(T, ConditionalInfo),
}

impl GithubClient {
    /// GET `path`, sending `If-None-Match` / `If-Modified-Since` from the
    /// supplied validators when present
    pub async fn get_conditional(
        &self,
        cancel: &CancellationToken,
        path: &str,
        validators: Option<&ConditionalInfo>,
    ) -> Result<ConditionalResponse> {
        let mut request = self.request(Method::GET, path);

        if let Some(validators) = validators {
            if let Some(etag) = &validators.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &validators.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = self.execute_with_retry(cancel, request).await?;
        let info = ConditionalInfo::from_headers(response.headers());

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(ConditionalResponse {
                not_modified: true,
                response: None,
                info,
            });
        }

        Ok(ConditionalResponse {
            not_modified: false,
            response: Some(response),
            info,
        })
    }

    /// Fetch repository metrics unless they are unchanged since `validators`
    pub async fn get_repository_conditional(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        name: &str,
        validators: Option<&ConditionalInfo>,
    ) -> Result<Conditional<RepoMetrics>> {
        let path = format!("/repos/{}/{}", owner, name);
        let conditional = self.get_conditional(cancel, &path, validators).await?;

        let response = match conditional.response {
            Some(response) if !conditional.not_modified => response,
            _ => return Ok(Conditional::NotModified(conditional.info)),
        };

        let response = ensure_ok(response).await?;
        let body = response.bytes().await?;
        let repo: RepoResponse = serde_json::from_slice(&body)?;

        Ok(Conditional::Modified(repo.into(), conditional.info))
    }
}
