//! Handler-level tests over the real router, without a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use polygraph_core::eval::CelEvaluator;
use polygraph_core::{Compiler, Engine, InferenceService, PolicyCache};
use polygraph_server::api::routes::create_router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

const CREDIT_POLICY: &str = r#"digraph Policy {
  start    [result=""]
  approved [result="approved=true,segment=prime"]
  review   [result="approved=false,segment=manual"]
  rejected [result="approved=false"]
  start -> approved [cond="age>=18 && score>700"]
  start -> review   [cond="age>=18 && score<=700"]
  start -> rejected [cond="age<18"]
}"#;

fn router() -> Router {
    let service = Arc::new(InferenceService::new(
        Compiler::new(),
        Engine::new(Arc::new(CelEvaluator)),
        Arc::new(PolicyCache::new(16)),
    ));
    create_router(service)
}

async fn post_infer(app: Router, body: String) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/infer")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_infer_success() {
    let body = json!({
        "policy_dot": CREDIT_POLICY,
        "input": {"age": 25, "score": 720},
    });
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["output"]["approved"], json!(true));
    assert_eq!(response["output"]["segment"], json!("prime"));
    assert_eq!(response["output"]["age"], json!(25));
    assert!(response.get("trace").is_none());
    assert!(response.get("policy").is_none());
}

#[tokio::test]
async fn test_infer_debug_returns_trace() {
    let body = json!({
        "policy_dot": CREDIT_POLICY,
        "input": {"age": 25, "score": 650},
        "debug": true,
    });
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["trace"]["terminated"], "leaf");
    assert_eq!(
        response["trace"]["visited_path"],
        json!(["start", "review"])
    );
}

#[tokio::test]
async fn test_infer_with_policy_id_returns_policy_info() {
    let body = json!({
        "policy_dot": CREDIT_POLICY,
        "input": {"age": 16, "score": 900},
        "policy_id": "credit",
        "policy_version": "v1",
    });
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["policy"]["id"], json!("credit"));
    assert_eq!(response["policy"]["version"], json!("v1"));
    assert_eq!(response["policy"]["hash"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_infer_missing_vars_is_bad_request_with_details() {
    let body = json!({
        "policy_dot": CREDIT_POLICY,
        "input": {"age": 20},
        "debug": true,
    });
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], json!("infer failed"));
    assert!(
        response["details"]
            .as_str()
            .unwrap()
            .contains("missing input vars [score]"),
        "{response}"
    );
    assert_eq!(
        response["trace"]["terminated"],
        "error_no_edge_matched_missing_vars"
    );
}

#[tokio::test]
async fn test_infer_cycle_is_bad_request() {
    let body = json!({
        "policy_dot": "digraph { a -> b; b -> a }",
    });
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        response["details"]
            .as_str()
            .unwrap()
            .contains("policy graph contains cycle: a -> b -> a"),
        "{response}"
    );
}

#[tokio::test]
async fn test_infer_mixed_options_is_bad_request() {
    let body = json!({
        "policy_dot": CREDIT_POLICY,
        "policy_id": "credit",
    });
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        response["details"]
            .as_str()
            .unwrap()
            .contains("policy_id and policy_version must be provided together"),
        "{response}"
    );
}

#[tokio::test]
async fn test_infer_malformed_json_is_bad_request() {
    let (status, response) = post_infer(router(), "{not json".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], json!("invalid json"));
}

#[tokio::test]
async fn test_infer_empty_policy_is_bad_request() {
    let body = json!({"policy_dot": ""});
    let (status, response) = post_infer(router(), body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        response["details"]
            .as_str()
            .unwrap()
            .contains("policy_dot is required"),
        "{response}"
    );
}

#[tokio::test]
async fn test_health() {
    let response = router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], json!("ok"));
}
