#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};
use repovitals_collector::{ClientConfig, GithubClient, RetryConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

/// Client pointed at the mock server with millisecond backoff
pub fn client(server: &MockServer) -> Arc<GithubClient> {
    client_for(&server.uri())
}

pub fn client_for(base_url: &str) -> Arc<GithubClient> {
    let config = ClientConfig {
        base_url: base_url.to_string(),
        retry: fast_retry(3),
        ..ClientConfig::with_token("ghp_test_token")
    };
    Arc::new(GithubClient::new(config).unwrap())
}

pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        on_retry: None,
    }
}

pub fn repo_json(owner: &str, name: &str, stars: i64) -> Value {
    json!({
        "id": 1,
        "owner": { "login": owner },
        "name": name,
        "full_name": format!("{owner}/{name}"),
        "stargazers_count": stars,
        "forks_count": 25,
        "open_issues_count": 12,
        "language": "Rust",
        "topics": ["cli"],
        "description": "A test repository"
    })
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - TimeDelta::days(days)
}

pub fn last_page_link(path: &str, page: u32) -> String {
    format!(
        concat!(
            r#"<https://api.github.com{path}?per_page=1&page=2>; rel="next", "#,
            r#"<https://api.github.com{path}?per_page=1&page={page}>; rel="last""#,
        ),
        path = path,
        page = page,
    )
}

pub async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |requests| requests.len())
}
