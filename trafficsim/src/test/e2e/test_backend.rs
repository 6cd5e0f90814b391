use rama::{
    Service as _,
    http::{
        Body, Method, Request, StatusCode,
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN, SERVER},
        service::client::HttpClientExt as _,
    },
};
use serde_json::json;
use trafficsim_lib::utils::env::network_service_identifier;

use super::runtime;

#[tokio::test]
#[tracing_test::traced_test]
async fn test_backend_serves_simulated_traffic() {
    let addr = runtime::spawn_backend("b-serve", &["--base-latency-ms", "5"]).await;

    let resp = runtime::client()
        .get(format!("http://{addr}/api/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(SERVER).unwrap(),
        network_service_identifier()
    );

    let (status, body) = runtime::get_json(addr, "/api/products").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backendId"], "b-serve");
    assert_eq!(body["path"], "/api/products");
    assert_eq!(body["method"], "GET");
    assert!(body["latencyMs"].as_u64().unwrap() >= 5);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_backend_admin_fault_overlay() {
    let addr = runtime::spawn_backend(
        "b-admin",
        &["--base-latency-ms", "2", "--max-capacity", "40"],
    )
    .await;

    let (status, body) = runtime::post_json(
        addr,
        "/_admin/inject-latency",
        &json!({"latencyMs": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalLatency"], 102);

    let (_, body) = runtime::post_json(
        addr,
        "/_admin/inject-errors",
        &json!({"errorRate": 100}),
    )
    .await;
    assert_eq!(body["injectedErrorRate"], 100.);

    let (status, body) = runtime::get_json(addr, "/api/orders").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal Server Error");

    let (_, body) = runtime::get_json(addr, "/_admin/status").await;
    assert_eq!(body["backendId"], "b-admin");
    assert_eq!(body["maxCapacity"], 40);
    assert_eq!(body["injectedLatency"], 100);

    let (_, body) = runtime::post_json(addr, "/_admin/reset", &json!({})).await;
    assert_eq!(body["message"], "Reset to baseline");
    assert_eq!(body["baseLatency"], 2);

    let (status, _) = runtime::get_json(addr, "/api/orders").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_backend_cors_preflight() {
    let addr = runtime::spawn_backend("b-cors", &["--base-latency-ms", "2000"]).await;

    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri(format!("http://{addr}/api/test"))
        .header(ORIGIN, "http://dashboard.localhost")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let resp = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        runtime::client().serve(req),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");

    let (_, body) = runtime::get_json(addr, "/_admin/status").await;
    assert_eq!(body["currentConcurrent"], 0);
}
