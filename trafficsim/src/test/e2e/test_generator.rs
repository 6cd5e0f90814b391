use std::time::Duration;

use rama::http::{
    StatusCode,
    header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN},
    service::client::HttpClientExt as _,
};
use serde_json::json;

use super::runtime;

#[tokio::test]
#[tracing_test::traced_test]
async fn test_generator_drives_single_target() {
    let backend = runtime::spawn_backend("b-target", &["--max-capacity", "1000"]).await;
    let target = format!("http://{backend}");
    let generator = runtime::spawn_generator(&["--target", &target]).await;

    let (_, body) = runtime::get_json(generator, "/health").await;
    assert_eq!(body, json!({"status": "healthy", "running": false}));

    let (status, body) = runtime::post_json(generator, "/start", &json!({"rps": 200})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rps"], 200);
    assert_eq!(body["requestsPerTick"], 1);
    assert_eq!(body["tickIntervalMs"], 5);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (_, body) = runtime::get_json(generator, "/status").await;
    assert_eq!(body["running"], true);
    assert_eq!(body["targetRps"], 200);
    assert!(body["stats"]["succeeded"].as_u64().unwrap() > 0, "{body}");
    assert!(body["actualRps"].as_f64().unwrap() > 0., "{body}");

    let (status, body) = runtime::post_json(generator, "/stop", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Traffic generator stopped");
    assert!(body["stats"]["total"].as_u64().unwrap() > 0);

    let (_, body) = runtime::get_json(generator, "/health").await;
    assert_eq!(body["running"], false);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_generator_rejects_rate_above_configured_max() {
    let generator = runtime::spawn_generator(&["--max-rps", "50"]).await;

    let (status, body) = runtime::post_json(generator, "/start", &json!({"rps": 51})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "RPS must be between 1 and 50 (got 51)");

    let (_, body) = runtime::get_json(generator, "/status").await;
    assert_eq!(body["running"], false);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_generator_open_circuit_receives_no_traffic() {
    let open = runtime::spawn_backend("b-open", &[]).await;
    let closed = runtime::spawn_backend("b-closed", &[]).await;

    let open_spec = format!("b-open=http://{open},100");
    let closed_spec = format!("b-closed=http://{closed},100");
    let generator =
        runtime::spawn_generator(&["--backend", &open_spec, "--backend", &closed_spec]).await;

    // any request routed to the open backend would fail
    runtime::post_json(open, "/_admin/inject-errors", &json!({"errorRate": 100})).await;

    let (status, body) = runtime::post_json(
        generator,
        "/backends",
        &json!({"id": "b-open", "circuitState": "OPEN"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["effectiveWeight"], 0.);

    let (_, body) = runtime::get_json(generator, "/backends").await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = runtime::post_json(generator, "/start", &json!({"rps": 100})).await;
    assert_eq!(status, StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    runtime::post_json(generator, "/stop", &json!({})).await;

    let (_, body) = runtime::get_json(generator, "/status").await;
    assert!(body["stats"]["succeeded"].as_u64().unwrap() > 0, "{body}");
    assert_eq!(body["stats"]["failed"], 0, "{body}");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_generator_allows_any_origin() {
    let generator = runtime::spawn_generator(&[]).await;

    let resp = runtime::client()
        .get(format!("http://{generator}/health"))
        .header(ORIGIN, "http://dashboard.localhost")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}
