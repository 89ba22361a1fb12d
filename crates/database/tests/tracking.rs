use repovitals_database::{Database, DEFAULT_CATEGORY};

fn categories(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn tracking_without_categories_uses_default() {
    let db = Database::in_memory().await.unwrap();

    let tracked = db.track_repo("tokio-rs/tokio", "tokio-rs", "tokio", &[]).await.unwrap();
    assert_eq!(tracked.full_name(), "tokio-rs/tokio");
    assert_eq!(tracked.categories, vec![DEFAULT_CATEGORY]);

    let blank = db.track_repo("a/b", "a", "b", &categories(&["  "])).await.unwrap();
    assert_eq!(blank.categories, vec![DEFAULT_CATEGORY]);
}

#[tokio::test]
async fn tracking_again_merges_categories() {
    let db = Database::in_memory().await.unwrap();

    let first = db
        .track_repo("serde-rs/serde", "serde-rs", "serde", &categories(&["serialization"]))
        .await
        .unwrap();
    let second = db
        .track_repo("serde-rs/serde", "Serde-RS", "Serde", &categories(&["core", "serialization"]))
        .await
        .unwrap();

    assert_eq!(second.categories, vec!["core", "serialization"]);
    // The first spelling and timestamp are kept
    assert_eq!(second.owner, "serde-rs");
    assert_eq!(second.added_at, first.added_at);
    assert_eq!(db.list_tracked_repos(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn listing_filters_by_category() {
    let db = Database::in_memory().await.unwrap();
    db.track_repo("a/one", "a", "one", &categories(&["web"])).await.unwrap();
    db.track_repo("a/two", "a", "two", &categories(&["cli", "web"])).await.unwrap();
    db.track_repo("a/three", "a", "three", &[]).await.unwrap();

    let all = db.list_tracked_repos(None).await.unwrap();
    let names: Vec<String> = all.iter().map(|r| r.full_name()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"a/three".to_string()));

    let web = db.list_tracked_repos(Some("web")).await.unwrap();
    let mut web_names: Vec<String> = web.iter().map(|r| r.full_name()).collect();
    web_names.sort();
    assert_eq!(web_names, vec!["a/one", "a/two"]);
    let two = web.iter().find(|r| r.name == "two").unwrap();
    assert_eq!(two.categories, vec!["cli", "web"]);
    assert!(two.in_category("cli"));

    assert!(db.list_tracked_repos(Some("missing")).await.unwrap().is_empty());
    assert_eq!(db.tracked_categories().await.unwrap(), vec!["cli", "default", "web"]);
}

#[tokio::test]
async fn untracking_removes_repo_and_categories() {
    let db = Database::in_memory().await.unwrap();
    db.track_repo("a/one", "a", "one", &categories(&["web"])).await.unwrap();

    assert!(db.untrack_repo("a/one").await.unwrap());
    assert!(!db.untrack_repo("a/one").await.unwrap());
    assert!(db.fetch_tracked_repo("a/one").await.unwrap().is_none());
    assert!(db.tracked_categories().await.unwrap().is_empty());
}

#[tokio::test]
async fn tracking_is_independent_of_collected_state() {
    let db = Database::in_memory().await.unwrap();
    db.track_repo("a/one", "a", "one", &[]).await.unwrap();

    assert_eq!(db.count_repo_states().await.unwrap(), 0);
    assert!(db.fetch_repo_state("a/one").await.unwrap().is_none());
}
