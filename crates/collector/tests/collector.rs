mod common;

use common::{client, days_ago, last_page_link, repo_json};
use repovitals_collector::{CollectorOptions, ConditionalInfo, RepoCollector, RepoErrorKind, RepoId};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mount every endpoint the collector touches for `a/b`, except contributors
async fn mount_healthy_repo(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/a/b"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"abc\"")
                .set_body_json(repo_json("a", "b", 1500)),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/a/b/pulls"))
        .and(query_param("state", "open"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", last_page_link("/repositories/1/pulls", 7).as_str())
                .set_body_json(json!([{ "number": 1 }])),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/a/b/pulls"))
        .and(query_param("state", "closed"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "number": 10, "merged_at": days_ago(1) },
            { "number": 11, "merged_at": days_ago(2) },
            { "number": 12, "merged_at": null },
            { "number": 13, "merged_at": days_ago(12) }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/a/b/pulls"))
        .and(query_param("state", "closed"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "number": 5, "merged_at": days_ago(20) }
        ])))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/a/b/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "number": 20, "created_at": days_ago(1) },
            { "number": 21, "created_at": days_ago(3) },
            {
                "number": 22,
                "created_at": days_ago(1),
                "pull_request": { "url": "https://api.github.com/x" }
            },
            { "number": 23, "created_at": days_ago(30) }
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/a/b/releases/latest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

#[tokio::test]
async fn collects_every_metric() {
    let server = MockServer::start().await;
    mount_healthy_repo(&server).await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b/contributors"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", last_page_link("/repositories/1/contributors", 42).as_str())
                .set_body_json(json!([{ "login": "someone" }])),
        )
        .mount(&server)
        .await;

    let collector = RepoCollector::new(client(&server));
    let result = collector
        .collect_repo(&CancellationToken::new(), &RepoId::new("a", "b"))
        .await;

    assert!(result.is_success());
    assert!(result.activity_error.is_none());

    let metrics = result.metrics.unwrap();
    assert_eq!(metrics.stars, 1500);
    assert_eq!(metrics.open_prs, 7);

    let activity = result.activity.unwrap();
    assert_eq!(activity.merged_prs_7d, 2);
    assert_eq!(activity.new_issues_7d, 2);
    assert_eq!(activity.contributors, 42);
    assert_eq!(activity.latest_release, None);
}

#[tokio::test]
async fn contributor_failure_is_isolated() {
    let server = MockServer::start().await;
    mount_healthy_repo(&server).await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b/contributors"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let collector = RepoCollector::new(client(&server));
    let result = collector
        .collect_repo(&CancellationToken::new(), &RepoId::new("a", "b"))
        .await;

    assert!(result.error.is_none());
    assert_eq!(result.metrics.as_ref().map(|m| m.stars), Some(1500));

    let errors = result.activity_error.as_ref().unwrap();
    assert!(errors.has_errors());
    assert!(errors.contributor.is_some());
    assert!(errors.pr.is_none());
    assert!(errors.issue.is_none());
    assert!(errors.release.is_none());

    let activity = result.activity.unwrap();
    assert_eq!(activity.contributors, 0);
    assert_eq!(activity.merged_prs_7d, 2);
    assert_eq!(activity.new_issues_7d, 2);
}

#[tokio::test]
async fn contributor_count_falls_back_to_enumeration() {
    let server = MockServer::start().await;
    let contributors: Vec<_> = (0..3).map(|i| json!({ "login": format!("user{i}") })).collect();

    Mock::given(method("GET"))
        .and(path("/repos/a/b/contributors"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "login": "user0" }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b/contributors"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(contributors)))
        .expect(1)
        .mount(&server)
        .await;

    let count = client(&server)
        .get_contributor_count(&CancellationToken::new(), "a", "b")
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn empty_repository_has_no_contributors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b/contributors"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let count = client(&server)
        .get_contributor_count(&CancellationToken::new(), "a", "b")
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn latest_release_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": "v2.0.0",
            "name": "Two",
            "published_at": "2026-09-30T10:00:00Z",
            "html_url": "https://github.com/a/b/releases/tag/v2.0.0"
        })))
        .mount(&server)
        .await;

    let release = client(&server)
        .get_latest_release(&CancellationToken::new(), "a", "b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(release.tag_name, "v2.0.0");
    assert_eq!(release.name.as_deref(), Some("Two"));
}

#[tokio::test]
async fn not_modified_skips_sub_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b"))
        .respond_with(ResponseTemplate::new(304).insert_header("etag", "\"abc\""))
        .expect(1)
        .mount(&server)
        .await;

    let validators = ConditionalInfo::new(Some("\"abc\"".to_string()), None);
    let result = RepoCollector::new(client(&server))
        .collect_repo_conditional(
            &CancellationToken::new(),
            &RepoId::new("a", "b"),
            Some(&validators),
        )
        .await;

    assert!(result.skipped);
    assert!(result.error.is_none());
    assert!(result.metrics.is_none());
    assert!(result.activity.is_none());
    assert_eq!(result.conditional.unwrap().etag.as_deref(), Some("\"abc\""));
    assert_eq!(common::request_count(&server).await, 1);
}

#[tokio::test]
async fn missing_repository_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/gone/away"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = RepoCollector::new(client(&server))
        .collect_repo_conditional(&CancellationToken::new(), &RepoId::new("gone", "away"), None)
        .await;

    let err = result.error.unwrap();
    assert_eq!(err.kind, RepoErrorKind::NotFound);
    assert_eq!(err.repo, "gone/away");
}

#[tokio::test]
async fn collect_all_accounts_for_every_repository() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/a/b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repo_json("a", "b", 5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/a/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let options = CollectorOptions {
        collect_prs: false,
        collect_activity: false,
    };
    let collector = RepoCollector::with_options(client(&server), options);
    let repos = vec![RepoId::new("a", "b"), RepoId::new("a", "missing")];

    let summary = collector.collect_all(&CancellationToken::new(), &repos).await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_repos, vec!["a/missing"]);
}

#[tokio::test]
async fn cancelled_collection_marks_the_rest_failed() {
    let server = MockServer::start().await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let repos = vec![RepoId::new("a", "one"), RepoId::new("a", "two")];
    let summary = RepoCollector::new(client(&server)).collect_all(&cancel, &repos).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.successful + summary.failed + summary.skipped, summary.total);
    assert!(summary
        .results
        .iter()
        .all(|r| r.error.as_ref().is_some_and(|e| e.source.is_cancelled())));
    assert_eq!(common::request_count(&server).await, 0);
}
