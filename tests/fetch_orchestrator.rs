// tests/fetch_orchestrator.rs
//
// fetch_all against a scripted client: ordering, retry-then-isolate,
// page caps and intra-source collapse.

mod common;

use common::{fast_fetch, ids, item, source, FakeClient};
use feed_courier::error::SourceError;
use feed_courier::ingest::fetch_all;

#[tokio::test]
async fn merged_order_follows_declaration_then_pages() {
    let client = FakeClient::new()
        .with_pages("A", vec![vec![item("A", "1"), item("A", "2")], vec![item("A", "3")]])
        .with_pages("B", vec![vec![item("B", "1")]]);
    let sources = vec![source("A"), source("B")];

    let out = fetch_all(&client, &sources, &fast_fetch()).await;

    assert!(out.errors.is_empty());
    assert_eq!(
        ids(&out.items),
        vec![
            "https://a.example.org/1",
            "https://a.example.org/2",
            "https://a.example.org/3",
            "https://b.example.org/1",
        ]
    );
    assert_eq!(out.reports[0].pages, 2);
    assert_eq!(out.reports[1].pages, 1);
}

#[tokio::test]
async fn transient_failure_is_retried_on_the_same_page() {
    let client = FakeClient::new()
        .with_pages("B", vec![vec![item("B", "1")]])
        .fail_first("B", 2);
    let sources = vec![source("B")];

    let out = fetch_all(&client, &sources, &fast_fetch()).await;

    assert!(out.errors.is_empty());
    assert_eq!(out.items.len(), 1);
    assert_eq!(out.reports[0].retries, 2);
    // all three calls asked for the first page
    let calls = client.calls.lock().unwrap();
    assert!(calls.iter().all(|(_, token)| token.is_none()));
    assert_eq!(calls.len(), 3);
}

#[tokio::test]
async fn failing_source_is_isolated_after_retry_budget() {
    let client = FakeClient::new()
        .with_pages("A", vec![vec![item("A", "1")]])
        .always_fail("Broken", SourceError::unavailable("timeout"))
        .with_pages("C", vec![vec![item("C", "1")]]);
    let sources = vec![source("A"), source("Broken"), source("C")];

    let out = fetch_all(&client, &sources, &fast_fetch()).await;

    assert_eq!(
        ids(&out.items),
        vec!["https://a.example.org/1", "https://c.example.org/1"]
    );
    assert!(matches!(out.errors.get("Broken"), Some(SourceError::Unavailable(_))));
    assert_eq!(client.calls_for("Broken"), 3, "three attempts, then give up");
}

#[tokio::test]
async fn misconfigured_source_is_not_retried() {
    let client = FakeClient::new().always_fail("Api", SourceError::Misconfigured("placeholder key".into()));
    let out = fetch_all(&client, &[source("Api")], &fast_fetch()).await;

    assert!(matches!(out.errors.get("Api"), Some(SourceError::Misconfigured(_))));
    assert_eq!(client.calls_for("Api"), 1);
}

#[tokio::test]
async fn page_cap_is_a_hard_stop() {
    let client = FakeClient::new().endless("Loop", vec![item("Loop", "same")]);
    let mut src = source("Loop");
    src.max_pages = Some(4);

    let out = fetch_all(&client, &[src], &fast_fetch()).await;

    assert_eq!(client.calls_for("Loop"), 4);
    assert_eq!(out.reports[0].pages, 4);
    // identical ids on every page collapse to one
    assert_eq!(out.items.len(), 1);
}

#[tokio::test]
async fn collapse_is_per_source_only() {
    let shared = item("A", "x");
    let mut from_b = shared.clone();
    from_b.source = "B".into();

    let client = FakeClient::new()
        .with_pages("A", vec![vec![shared.clone()], vec![shared.clone()]])
        .with_pages("B", vec![vec![from_b]]);
    let out = fetch_all(&client, &[source("A"), source("B")], &fast_fetch()).await;

    // same id from another source survives here; the deduplicator handles it
    assert_eq!(out.items.len(), 2);
    assert_eq!(out.items[1].source, "B");
}

#[tokio::test(start_paused = true)]
async fn retries_wait_with_doubling_backoff() {
    let client = FakeClient::new()
        .with_pages("B", vec![vec![item("B", "1")]])
        .fail_first("B", 2);

    let t0 = tokio::time::Instant::now();
    let out = fetch_all(&client, &[source("B")], &fast_fetch()).await;

    assert_eq!(out.items.len(), 1);
    // 10ms after the first failure, 20ms after the second
    assert!(t0.elapsed() >= std::time::Duration::from_millis(30));
}
