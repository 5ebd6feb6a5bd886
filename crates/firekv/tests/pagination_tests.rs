//! Cursor pagination and derived query helpers against a mock store.

mod common;

use std::collections::BTreeSet;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use firekv::FirekvError;

use common::{test_client, KeyOrderedNode};

fn five_posts() -> KeyOrderedNode {
    KeyOrderedNode::new(&[
        ("-N001", json!({"title": "one"})),
        ("-N002", json!({"title": "two"})),
        ("-N003", json!({"title": "three"})),
        ("-N004", json!({"title": "four"})),
        ("-N005", json!({"title": "five"})),
    ])
}

async fn mount_posts(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/posts.json"))
        .respond_with(five_posts())
        .mount(server)
        .await;
}

#[tokio::test]
async fn forward_pages_follow_the_documented_scenario() {
    let server = MockServer::start().await;
    mount_posts(&server).await;
    let client = test_client(&server).await;

    let page = client
        .paginate::<Value>("posts", 2, None, false)
        .await
        .unwrap();
    assert_eq!(page.keys().collect::<Vec<_>>(), ["-N001", "-N002"]);
    assert_eq!(page.next_cursor.as_deref(), Some("-N002"));
    assert_eq!(page.prev_cursor.as_deref(), Some("-N001"));
    assert!(page.has_more);

    let page = client
        .paginate::<Value>("posts", 2, Some("-N002"), false)
        .await
        .unwrap();
    assert_eq!(page.keys().collect::<Vec<_>>(), ["-N003", "-N004"]);
    assert!(page.has_more);

    let page = client
        .paginate::<Value>("posts", 2, Some("-N004"), false)
        .await
        .unwrap();
    assert_eq!(page.keys().collect::<Vec<_>>(), ["-N005"]);
    assert!(!page.has_more);
}

#[tokio::test]
async fn forward_walk_enumerates_everything_exactly_once() {
    let server = MockServer::start().await;
    mount_posts(&server).await;
    let client = test_client(&server).await;

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = client
            .paginate::<Value>("posts", 2, cursor.as_deref(), false)
            .await
            .unwrap();
        seen.extend(page.keys().map(str::to_string));
        pages += 1;
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor.clone();
    }

    assert_eq!(pages, 3); // ceil(5 / 2)
    assert_eq!(seen, ["-N001", "-N002", "-N003", "-N004", "-N005"]);
}

#[tokio::test]
async fn reverse_walk_is_descending_and_covers_the_same_keys() {
    let server = MockServer::start().await;
    mount_posts(&server).await;
    let client = test_client(&server).await;

    let first = client
        .paginate::<Value>("posts", 2, None, true)
        .await
        .unwrap();
    assert_eq!(first.keys().collect::<Vec<_>>(), ["-N005", "-N004"]);
    assert_eq!(first.next_cursor.as_deref(), Some("-N004"));
    assert_eq!(first.prev_cursor.as_deref(), Some("-N005"));
    assert!(first.has_more);

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = client
            .paginate::<Value>("posts", 2, cursor.as_deref(), true)
            .await
            .unwrap();
        seen.extend(page.keys().map(str::to_string));
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor.clone();
    }

    assert_eq!(seen, ["-N005", "-N004", "-N003", "-N002", "-N001"]);

    let forward: BTreeSet<&str> = ["-N001", "-N002", "-N003", "-N004", "-N005"]
        .into_iter()
        .collect();
    let reversed: BTreeSet<&str> = seen.iter().map(String::as_str).collect();
    assert_eq!(forward, reversed);
}

#[tokio::test]
async fn exact_page_boundary_reports_no_more() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pair.json"))
        .respond_with(KeyOrderedNode::new(&[
            ("k1", json!(1)),
            ("k2", json!(2)),
        ]))
        .mount(&server)
        .await;
    let client = test_client(&server).await;

    let page = client.paginate::<Value>("pair", 2, None, false).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(!page.has_more);
    assert_eq!(page.next_cursor.as_deref(), Some("k2"));
}

#[tokio::test]
async fn empty_node_yields_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/void.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;
    let client = test_client(&server).await;

    let page = client.paginate::<Value>("void", 3, None, false).await.unwrap();
    assert!(page.is_empty());
    assert!(!page.has_more);
    assert_eq!(page.next_cursor, None);
    assert_eq!(page.prev_cursor, None);
}

#[tokio::test]
async fn zero_page_size_is_rejected() {
    let server = MockServer::start().await;
    let client = test_client(&server).await;

    let err = client
        .paginate::<Value>("posts", 0, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, FirekvError::InvalidQuery(_)));
}

#[tokio::test]
async fn paginate_with_count_adds_the_node_total() {
    let server = MockServer::start().await;
    mount_posts(&server).await;
    let client = test_client(&server).await;

    let page = client
        .paginate_with_count::<Value>("posts", 2, None, false)
        .await
        .unwrap();
    assert_eq!(page.keys().collect::<Vec<_>>(), ["-N001", "-N002"]);
    assert_eq!(page.total, Some(5));
    assert!(page.has_more);
}

// =============================================================================
// Derived helpers
// =============================================================================

#[tokio::test]
async fn top_returns_descending_by_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scores.json"))
        .and(query_param("orderBy", "\"points\""))
        .and(query_param("limitToLast", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "carol": {"points": 30},
            "bob": {"points": 20},
        })))
        .mount(&server)
        .await;
    let client = test_client(&server).await;

    let top: Vec<(String, Value)> = client.top("scores", 2, "points").await.unwrap();
    let keys: Vec<&str> = top.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["carol", "bob"]);
}

#[tokio::test]
async fn bottom_returns_ascending_by_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scores.json"))
        .and(query_param("orderBy", "\"points\""))
        .and(query_param("limitToFirst", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bob": {"points": 20},
            "alice": {"points": 10},
        })))
        .mount(&server)
        .await;
    let client = test_client(&server).await;

    let bottom: Vec<(String, Value)> = client.bottom("scores", 2, "points").await.unwrap();
    let keys: Vec<&str> = bottom.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["alice", "bob"]);
}

#[tokio::test]
async fn find_by_value_matches_exactly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users.json"))
        .and(query_param("orderBy", "\"status\""))
        .and(query_param("equalTo", "\"active\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "u2": {"status": "active"},
            "u1": {"status": "active"},
        })))
        .mount(&server)
        .await;
    let client = test_client(&server).await;

    let matches: Vec<(String, Value)> =
        client.find_by_value("users", "status", "active").await.unwrap();
    let keys: Vec<&str> = matches.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["u1", "u2"]);
}

#[tokio::test]
async fn range_is_inclusive_and_field_ordered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scores.json"))
        .and(query_param("orderBy", "\"points\""))
        .and(query_param("startAt", "10"))
        .and(query_param("endAt", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bob": {"points": 20},
            "alice": {"points": 10},
        })))
        .mount(&server)
        .await;
    let client = test_client(&server).await;

    let hits: Vec<(String, Value)> = client.range("scores", "points", 10, 20).await.unwrap();
    let keys: Vec<&str> = hits.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["alice", "bob"]);
}
