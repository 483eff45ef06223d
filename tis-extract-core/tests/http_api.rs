use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tis_extract_core::config::{ApiConfig, ExtractorConfig};
use tis_extract_core::contract::TreeApi;
use tis_extract_core::error::{FetchError, SetupError};
use tis_extract_core::http::HttpTreeApi;
use tis_extract_core::traverse::{RunState, Traversal};

fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}/tis/nodes/", server.uri()),
        root_id: "100".into(),
        read_timeout_secs: 2,
        ..ApiConfig::default()
    }
}

#[tokio::test]
async fn node_request_carries_mapping_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/100"))
        .and(query_param("mappingType", "TCI"))
        .and(query_param("childrenlevel", "1"))
        .and(query_param("attributes", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rId": 100,
            "name": "TIS",
            "children": [{ "rId": 101, "name": "ProjA" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpTreeApi::new(&api_config(&server)).unwrap();
    let node = api.get_node("100").await.unwrap();
    assert_eq!(node.id(), "100");
    let children = node.child_nodes(0);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, "101");
    assert_eq!(children[0].name, "ProjA");
}

#[tokio::test]
#[serial]
async fn bearer_token_is_read_from_the_environment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/100"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rId": "100" })))
        .expect(1)
        .mount(&server)
        .await;

    std::env::set_var("TIS_EXTRACT_TEST_TOKEN", "secret-token");
    let config = ApiConfig {
        token_env: Some("TIS_EXTRACT_TEST_TOKEN".into()),
        ..api_config(&server)
    };
    let api = HttpTreeApi::new(&config).unwrap();
    std::env::remove_var("TIS_EXTRACT_TEST_TOKEN");

    assert!(api.get_node("100").await.is_ok());
}

#[tokio::test]
#[serial]
async fn missing_token_variable_is_a_setup_error() {
    std::env::remove_var("TIS_EXTRACT_ABSENT_TOKEN");
    let config = ApiConfig {
        token_env: Some("TIS_EXTRACT_ABSENT_TOKEN".into()),
        ..ApiConfig::default()
    };
    match HttpTreeApi::new(&config) {
        Err(SetupError::MissingToken(var)) => assert_eq!(var, "TIS_EXTRACT_ABSENT_TOKEN"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a missing token error"),
    }
}

#[tokio::test]
async fn error_status_maps_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such node"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/503"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let api = HttpTreeApi::new(&api_config(&server)).unwrap();
    assert_eq!(
        api.get_node("404").await.unwrap_err(),
        FetchError::Api {
            status: 404,
            message: "no such node".into()
        }
    );
    assert_eq!(
        api.get_node("503").await.unwrap_err(),
        FetchError::Api {
            status: 503,
            message: "Service Unavailable".into()
        }
    );
}

#[tokio::test]
async fn malformed_or_empty_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/bad"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/empty"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let api = HttpTreeApi::new(&api_config(&server)).unwrap();
    assert!(matches!(api.get_node("bad").await, Err(FetchError::Parse(_))));
    assert!(matches!(api.get_node("empty").await, Err(FetchError::Parse(_))));
}

#[tokio::test]
async fn slow_response_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rId": "slow" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = ApiConfig {
        read_timeout_secs: 1,
        ..api_config(&server)
    };
    let api = HttpTreeApi::new(&config).unwrap();
    assert!(matches!(api.get_node("slow").await, Err(FetchError::Timeout(_))));
}

#[tokio::test]
async fn traversal_retries_service_unavailable_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/100"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rId": 100,
            "name": "TIS",
            "children": []
        })))
        .mount(&server)
        .await;

    let mut config = ExtractorConfig::default();
    config.api = api_config(&server);
    config.retry.initial_backoff_ms = 1;
    let api = Arc::new(HttpTreeApi::new(&config.api).unwrap());
    let outcome = Traversal::from_config(api, &config)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.stats.api_calls, 2);
    assert_eq!(outcome.stats.retries, 1);
}

#[tokio::test]
async fn deep_response_is_cut_at_the_requested_level() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/100"))
        .and(query_param("childrenlevel", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rId": 100,
            "children": [{
                "rId": 101,
                "children": [{ "rId": 102, "children": [{ "rId": 103 }] }]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig {
        children_level: 2,
        ..api_config(&server)
    };
    let api = HttpTreeApi::new(&config).unwrap();
    let node = api.get_node("100").await.unwrap();

    let child = &node.children.as_ref().unwrap()[0];
    let grandchild = &child.children.as_ref().unwrap()[0];
    assert_eq!(grandchild.id(), "102");
    assert!(grandchild.children.is_none());
}

#[tokio::test]
async fn slow_node_is_requested_shallower_next_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/200"))
        .and(query_param("childrenlevel", "3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rId": 200, "children": [] }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/200"))
        .and(query_param("childrenlevel", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rId": 200, "children": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig {
        children_level: 3,
        slow_response_ms: 50,
        ..api_config(&server)
    };
    let api = HttpTreeApi::new(&config).unwrap();
    assert!(api.get_node("200").await.is_ok());
    assert_eq!(api.depth_for("200"), 2);
    assert_eq!(api.depth_for("other"), 3);
    assert!(api.get_node("200").await.is_ok());
}

#[tokio::test]
async fn timed_out_node_is_retried_shallower() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/300"))
        .and(query_param("childrenlevel", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rId": 300 }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/300"))
        .and(query_param("childrenlevel", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rId": 300, "children": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig {
        children_level: 2,
        read_timeout_secs: 1,
        ..api_config(&server)
    };
    let api = HttpTreeApi::new(&config).unwrap();
    assert!(matches!(api.get_node("300").await, Err(FetchError::Timeout(_))));
    assert_eq!(api.depth_for("300"), 1);
    assert!(api.get_node("300").await.is_ok());
}

#[tokio::test]
async fn fixed_depth_never_changes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tis/nodes/400"))
        .and(query_param("childrenlevel", "3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "rId": 400 }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let config = ApiConfig {
        children_level: 3,
        slow_response_ms: 10,
        adaptive_depth: false,
        ..api_config(&server)
    };
    let api = HttpTreeApi::new(&config).unwrap();
    assert!(api.get_node("400").await.is_ok());
    assert!(api.get_node("400").await.is_ok());
    assert_eq!(api.depth_for("400"), 3);
}
