//! Counting paginated collections via the `Link` header

use crate::client::{ensure_ok, GithubClient};
use crate::Result;
use regex::Regex;
use reqwest::header::LINK;
use reqwest::StatusCode;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

pub(crate) const MAX_PAGES: u32 = 10;
const ENUMERATION_PAGE_SIZE: usize = 100;

static LAST_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<[^>]*[?&]page=(\d+)[^>]*>;\s*rel="last""#).expect("valid regex")
});

/// Page number of the `rel="last"` link, if any
pub(crate) fn parse_last_page(link: &str) -> Option<u64> {
    LAST_PAGE
        .captures(link)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn with_query(path: &str, query: &str) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, separator, query)
}

impl GithubClient {
    /// Count the items of a paginated list endpoint.
    ///
    /// Asks for one item per page and reads the last page number from the
    /// `Link` header. Without a usable header, enumerates pages of 100 until
    /// a short page or the page cap. 204 counts as empty.
    pub(crate) async fn count_items(&self, cancel: &CancellationToken, path: &str) -> Result<u64> {
        let response = self.get(cancel, &with_query(path, "per_page=1")).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        let response = ensure_ok(response).await?;

        let last_page = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_page);
        if let Some(count) = last_page {
            return Ok(count);
        }

        let mut count = 0u64;
        for page in 1..=MAX_PAGES {
            let query = format!("per_page={}&page={}", ENUMERATION_PAGE_SIZE, page);
            let page_path = with_query(path, &query);
            let response = self.get(cancel, &page_path).await?;
            if response.status() == StatusCode::NO_CONTENT {
                break;
            }
            let body = ensure_ok(response).await?.bytes().await?;
            let items: Vec<serde_json::Value> = serde_json::from_slice(&body)?;

            count += items.len() as u64;
            if items.len() < ENUMERATION_PAGE_SIZE {
                break;
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_page_from_link_header() {
        let link = concat!(
            r#"<https://api.github.com/repos/a/b/contributors?per_page=1&page=2>; rel="next", "#,
            r#"<https://api.github.com/repos/a/b/contributors?per_page=1&page=347>; rel="last""#,
        );
        assert_eq!(parse_last_page(link), Some(347));
    }

    #[test]
    fn page_may_come_first_in_query() {
        let link = r#"<https://api.github.com/repos/a/b/pulls?page=12&per_page=1>; rel="last""#;
        assert_eq!(parse_last_page(link), Some(12));
    }

    #[test]
    fn no_last_relation() {
        let link = r#"<https://api.github.com/repos/a/b/pulls?page=1>; rel="prev""#;
        assert_eq!(parse_last_page(link), None);
        assert_eq!(parse_last_page(""), None);
    }

    #[test]
    fn builds_query_strings() {
        assert_eq!(with_query("/repos/a/b/pulls", "per_page=1"), "/repos/a/b/pulls?per_page=1");
        assert_eq!(
            with_query("/repos/a/b/pulls?state=open", "per_page=1"),
            "/repos/a/b/pulls?state=open&per_page=1"
        );
    }
}
