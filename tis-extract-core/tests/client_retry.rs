use mockall::predicate::eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tis_extract_core::client::{RetryPolicy, TreeClient};
use tis_extract_core::contract::MockTreeApi;
use tis_extract_core::error::FetchError;
use tis_extract_core::model::{RawNode, TreeNode};
use tis_extract_core::stats::RunStats;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        ..RetryPolicy::default()
    }
}

fn node(id: &str, children: serde_json::Value) -> RawNode {
    serde_json::from_value(json!({ "rId": id, "name": id, "children": children })).unwrap()
}

#[tokio::test]
async fn timeouts_are_retried_up_to_the_limit() {
    let mut api = MockTreeApi::new();
    api.expect_get_node()
        .with(eq("n1"))
        .times(4)
        .returning(|_| Err(FetchError::Timeout("slow".into())));

    let stats = Arc::new(RunStats::default());
    let client = TreeClient::new(
        Arc::new(api),
        fast_policy(3),
        stats.clone(),
        CancellationToken::new(),
    );
    let err = client.fetch_node("n1").await.unwrap_err();

    assert_eq!(err, FetchError::Timeout("slow".into()));
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.api_calls, 4);
    assert_eq!(snapshot.retries, 3);
}

#[tokio::test]
async fn client_errors_fail_immediately() {
    let mut api = MockTreeApi::new();
    api.expect_get_node().times(1).returning(|_| {
        Err(FetchError::Api {
            status: 403,
            message: "forbidden".into(),
        })
    });

    let client = TreeClient::new(
        Arc::new(api),
        fast_policy(3),
        Arc::new(RunStats::default()),
        CancellationToken::new(),
    );
    let err = client.fetch_node("n1").await.unwrap_err();
    assert!(matches!(err, FetchError::Api { status: 403, .. }));
}

#[tokio::test]
async fn transient_failure_then_success() {
    let mut api = MockTreeApi::new();
    let mut seq = mockall::Sequence::new();
    api.expect_get_node()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Err(FetchError::Api {
                status: 503,
                message: "busy".into(),
            })
        });
    api.expect_get_node()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|id| Ok(node(id, json!([{ "rId": "c1", "name": "child" }]))));

    let client = TreeClient::new(
        Arc::new(api),
        fast_policy(2),
        Arc::new(RunStats::default()),
        CancellationToken::new(),
    );
    let children = client.fetch_children(&TreeNode::root("n1")).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, "c1");
    assert_eq!(children[0].level, 1);
    assert_eq!(children[0].parent_id.as_deref(), Some("n1"));
}

#[tokio::test]
async fn repeated_lookups_are_served_from_cache() {
    let mut api = MockTreeApi::new();
    api.expect_get_node()
        .times(1)
        .returning(|id| Ok(node(id, json!([]))));

    let stats = Arc::new(RunStats::default());
    let client = TreeClient::new(
        Arc::new(api),
        fast_policy(0),
        stats.clone(),
        CancellationToken::new(),
    );
    for _ in 0..3 {
        client.fetch_node("n1").await.unwrap();
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.api_calls, 1);
    assert_eq!(snapshot.cache_hits, 2);
    assert_eq!(client.cached_len(), 1);
}

#[tokio::test]
async fn concurrent_requests_for_one_node_share_a_fetch() {
    let mut api = MockTreeApi::new();
    api.expect_get_node().times(1).returning(|id| {
        std::thread::sleep(Duration::from_millis(20));
        Ok(node(id, json!([])))
    });

    let client = Arc::new(TreeClient::new(
        Arc::new(api),
        fast_policy(0),
        Arc::new(RunStats::default()),
        CancellationToken::new(),
    ));
    let (a, b) = tokio::join!(client.fetch_node("n1"), client.fetch_node("n1"));
    assert_eq!(a.unwrap().id(), "n1");
    assert_eq!(b.unwrap().id(), "n1");
}

#[tokio::test]
async fn cancelled_client_sends_nothing() {
    let mut api = MockTreeApi::new();
    api.expect_get_node().never();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let client = TreeClient::new(
        Arc::new(api),
        fast_policy(3),
        Arc::new(RunStats::default()),
        cancel,
    );
    assert_eq!(
        client.fetch_node("n1").await.unwrap_err(),
        FetchError::Cancelled
    );
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let mut api = MockTreeApi::new();
    api.expect_get_node()
        .times(1)
        .returning(|_| Err(FetchError::Network("reset".into())));

    let cancel = CancellationToken::new();
    let policy = RetryPolicy {
        max_retries: 5,
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        ..RetryPolicy::default()
    };
    let client = TreeClient::new(
        Arc::new(api),
        policy,
        Arc::new(RunStats::default()),
        cancel.clone(),
    );
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });
    let result = tokio::time::timeout(Duration::from_secs(5), client.fetch_node("n1"))
        .await
        .expect("backoff should be interrupted");
    assert_eq!(result.unwrap_err(), FetchError::Cancelled);
}

#[tokio::test]
async fn embedded_subtrees_are_served_without_requests() {
    let mut api = MockTreeApi::new();
    api.expect_get_node().with(eq("root")).times(1).returning(|id| {
        Ok(node(
            id,
            json!([
                { "rId": "c1", "name": "c1", "children": [
                    { "rId": "c2", "name": "c2", "children": [] }
                ]},
                { "rId": "c3", "name": "c3" }
            ]),
        ))
    });
    api.expect_get_node()
        .with(eq("c3"))
        .times(1)
        .returning(|id| Ok(node(id, json!([]))));

    let stats = Arc::new(RunStats::default());
    let client = TreeClient::new(
        Arc::new(api),
        fast_policy(0),
        stats.clone(),
        CancellationToken::new(),
    );
    client.fetch_node("root").await.unwrap();
    let c1 = client.fetch_node("c1").await.unwrap();
    assert_eq!(c1.children.as_ref().map(Vec::len), Some(1));
    let c2 = client.fetch_node("c2").await.unwrap();
    assert_eq!(c2.children.as_ref().map(Vec::len), Some(0));
    client.fetch_node("c3").await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.api_calls, 2);
    assert_eq!(snapshot.nodes_seeded, 2);
    assert_eq!(snapshot.cache_hits, 2);
}

#[tokio::test]
async fn first_backoff_respects_the_cap() {
    let mut api = MockTreeApi::new();
    api.expect_get_node()
        .times(2)
        .returning(|_| Err(FetchError::Timeout("slow".into())));

    let policy = RetryPolicy {
        max_retries: 1,
        initial_delay: Duration::from_secs(60),
        max_delay: Duration::from_millis(5),
        ..RetryPolicy::default()
    };
    let client = TreeClient::new(
        Arc::new(api),
        policy,
        Arc::new(RunStats::default()),
        CancellationToken::new(),
    );
    let result = tokio::time::timeout(Duration::from_secs(5), client.fetch_node("n1"))
        .await
        .expect("first sleep should be capped at max_delay");
    assert!(matches!(result, Err(FetchError::Timeout(_))));
}
