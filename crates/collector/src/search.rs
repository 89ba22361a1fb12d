//! Repository search

use crate::client::GithubClient;
use crate::repository::OwnerResponse;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

const DEFAULT_PER_PAGE: u32 = 30;
const MAX_PER_PAGE: u32 = 100;

/// One repository from a search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub stars: i64,
    pub forks: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    owner: OwnerResponse,
    name: String,
    full_name: String,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    stargazers_count: i64,
    forks_count: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<SearchItem> for SearchResult {
    fn from(item: SearchItem) -> Self {
        Self {
            owner: item.owner.login,
            name: item.name,
            full_name: item.full_name,
            description: item.description,
            language: item.language,
            topics: item.topics,
            stars: item.stargazers_count,
            forks: item.forks_count,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

fn search_path(query: &str, sort: Option<&str>, order: Option<&str>, per_page: u32) -> String {
    let per_page = match per_page {
        0 => DEFAULT_PER_PAGE,
        n => n.min(MAX_PER_PAGE),
    };

    let mut params = form_urlencoded::Serializer::new(String::new());
    params.append_pair("q", query);
    if let Some(sort) = sort.filter(|s| !s.is_empty()) {
        params.append_pair("sort", sort);
    }
    if let Some(order) = order.filter(|o| !o.is_empty()) {
        params.append_pair("order", order);
    }
    params.append_pair("per_page", &per_page.to_string());

    format!("/search/repositories?{}", params.finish())
}

impl GithubClient {
    /// Search repositories with GitHub's search syntax.
    /// `per_page` of 0 means 30; values above 100 are capped.
    pub async fn search_repositories(
        &self,
        cancel: &CancellationToken,
        query: &str,
        sort: Option<&str>,
        order: Option<&str>,
        per_page: u32,
    ) -> Result<Vec<SearchResult>> {
        let path = search_path(query, sort, order, per_page);
        let response: SearchResponse = self.get_json(cancel, &path).await?;
        Ok(response.items.into_iter().map(SearchResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_query_parameters() {
        let path = search_path("topic:rust stars:>100", Some("stars"), Some("desc"), 50);
        assert_eq!(
            path,
            "/search/repositories?q=topic%3Arust+stars%3A%3E100&sort=stars&order=desc&per_page=50"
        );
    }

    #[test]
    fn clamps_page_size() {
        assert!(search_path("x", None, None, 0).ends_with("per_page=30"));
        assert!(search_path("x", None, None, 500).ends_with("per_page=100"));
        assert_eq!(search_path("x", Some(""), None, 10), "/search/repositories?q=x&per_page=10");
    }
}
