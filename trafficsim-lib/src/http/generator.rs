//! Control api of the traffic generator.

use std::{convert::Infallible, sync::Arc};

use rama::{
    Service,
    http::{
        Request, Response, StatusCode,
        service::web::{
            Router,
            extract::{Bytes, State},
            response::{IntoResponse, Json as JsonResponse},
        },
    },
    telemetry::tracing,
};
use serde::Serialize;

use crate::dispatcher::{BackendUpdate, Dispatcher, StatsSnapshot, TickPlan};

use super::error_response;

pub fn new_control_svc(
    dispatcher: Dispatcher,
) -> impl Service<Request, Output = Response, Error = Infallible> + Clone {
    Arc::new(
        Router::new_with_state(dispatcher)
            .with_post("/start", start)
            .with_post("/stop", stop)
            .with_get("/status", status)
            .with_post("/reset-stats", reset_stats)
            .with_get("/health", health)
            .with_get("/backends", list_backends)
            .with_post("/backends", update_backend),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Started {
    message: &'static str,
    #[serde(flatten)]
    plan: TickPlan,
}

#[derive(Debug, Serialize)]
struct WithStats {
    message: &'static str,
    stats: StatsSnapshot,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    running: bool,
}

// bodies are json whatever the content type, malformed ones get a json 400

async fn start(State(dispatcher): State<Dispatcher>, Bytes(body): Bytes) -> impl IntoResponse {
    let max_rps = dispatcher.config().max_rps;
    let rps = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|body| body.get("rps").and_then(serde_json::Value::as_i64));
    let Some(rps) = rps else {
        tracing::debug!(
            body.len = body.len(),
            "reject start request: missing or non-integer rps"
        );
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("RPS must be between 1 and {max_rps}"),
        );
    };

    match dispatcher.start(rps) {
        Ok(plan) => JsonResponse(Started {
            message: "Traffic generator started",
            plan,
        })
        .into_response(),
        Err(err) => {
            tracing::debug!("reject start request: {err}");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

async fn stop(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    JsonResponse(WithStats {
        message: "Traffic generator stopped",
        stats: dispatcher.stop(),
    })
}

async fn status(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    JsonResponse(dispatcher.status())
}

async fn reset_stats(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    JsonResponse(WithStats {
        message: "Stats reset",
        stats: dispatcher.reset_stats(),
    })
}

async fn health(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    JsonResponse(Health {
        status: "healthy",
        running: dispatcher.is_running(),
    })
}

async fn list_backends(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    JsonResponse(dispatcher.backends())
}

async fn update_backend(
    State(dispatcher): State<Dispatcher>,
    Bytes(body): Bytes,
) -> impl IntoResponse {
    let update: BackendUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid backend update: {err}"),
            );
        }
    };
    match dispatcher.update_backend(&update) {
        Ok(view) => JsonResponse(view).into_response(),
        Err(err) => error_response(StatusCode::NOT_FOUND, &err.to_string()),
    }
}
