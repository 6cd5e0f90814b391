//! HTTP face of a simulated backend.
//!
//! Paths under [`ADMIN_PATH_PREFIX`] control the fault overlay,
//! any other request is simulated traffic served by the load model.
//! `OPTIONS` requests are never simulated.

use std::convert::Infallible;

use rama::{
    Service,
    http::{
        Method, Request, Response, StatusCode,
        service::web::{
            Router,
            extract::{Bytes, State},
            response::{IntoResponse, Json as JsonResponse},
        },
    },
    service::BoxService,
    telemetry::tracing,
    utils::str::arcstr::ArcStr,
};
use serde::Serialize;
use serde_json::Value;

use crate::backend::{BackendLoadModel, HandleError};

pub const ADMIN_PATH_PREFIX: &str = "/_admin/";

#[derive(Clone)]
pub struct BackendHttpService {
    model: BackendLoadModel,
    admin: BoxService<Request, Response, Infallible>,
}

impl std::fmt::Debug for BackendHttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHttpService")
            .field("model", &self.model)
            .finish()
    }
}

impl BackendHttpService {
    pub fn new(model: BackendLoadModel) -> Self {
        let admin = Router::new_with_state(model.clone())
            .with_post("/_admin/inject-latency", inject_latency)
            .with_post("/_admin/inject-errors", inject_errors)
            .with_get("/_admin/status", status)
            .with_post("/_admin/reset", reset)
            .boxed();
        Self { model, admin }
    }

    async fn simulate(&self, req: Request) -> Response {
        let backend_id = self.model.id().clone();
        match self.model.handle().await {
            Ok(served) => JsonResponse(SimulatedResponse {
                backend_id,
                path: req.uri().path().to_owned(),
                method: req.method().to_string(),
                latency_ms: served.latency.as_millis() as u64,
                concurrent: served.concurrent,
                load_percent: (served.load_pct * 100.).round() / 100.,
                message: "Success",
            })
            .into_response(),
            Err(HandleError::Injected(fault)) => {
                tracing::trace!(backend.id = %backend_id, "simulated request failed: {fault}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    JsonResponse(SimulatedFailure {
                        backend_id,
                        error: "Internal Server Error",
                    }),
                )
                    .into_response()
            }
            Err(HandleError::OverCapacity(err)) => {
                tracing::trace!(backend.id = %backend_id, "simulated request rejected: {err}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    JsonResponse(SimulatedFailure {
                        backend_id,
                        error: "Over Capacity",
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl Service<Request> for BackendHttpService {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        if req.method() == Method::OPTIONS {
            return Ok(StatusCode::OK.into_response());
        }
        if req.uri().path().starts_with(ADMIN_PATH_PREFIX) {
            return self.admin.serve(req).await;
        }
        Ok(self.simulate(req).await)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulatedResponse {
    backend_id: ArcStr,
    path: String,
    method: String,
    latency_ms: u64,
    concurrent: u32,
    load_percent: f64,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulatedFailure {
    backend_id: ArcStr,
    error: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetDone {
    backend_id: ArcStr,
    message: &'static str,
    base_latency: u64,
}

// malformed or missing bodies and values fall back to 0 (no fault)

fn body_field(body: &[u8], name: &str) -> Option<Value> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get_mut(name)
        .map(Value::take)
}

/// Whole milliseconds from a number (truncated) or from
/// the leading digits of a string such as `"300"` or `"300ms"`.
fn parse_latency_ms(value: Option<Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.).map(|f| f.trunc() as u64))
            .unwrap_or_default(),
        Some(Value::String(s)) => {
            let s = s.trim_start();
            let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
            s[..end].parse().unwrap_or_default()
        }
        _ => 0,
    }
}

fn parse_error_rate(value: Option<Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|rate| rate.is_finite())
    .unwrap_or_default()
}

async fn inject_latency(
    State(model): State<BackendLoadModel>,
    Bytes(body): Bytes,
) -> impl IntoResponse {
    let latency_ms = parse_latency_ms(body_field(&body, "latencyMs"));
    JsonResponse(model.inject_latency(latency_ms))
}

async fn inject_errors(
    State(model): State<BackendLoadModel>,
    Bytes(body): Bytes,
) -> impl IntoResponse {
    let error_rate = parse_error_rate(body_field(&body, "errorRate"));
    JsonResponse(model.inject_errors(error_rate))
}

async fn status(State(model): State<BackendLoadModel>) -> impl IntoResponse {
    JsonResponse(model.status())
}

async fn reset(State(model): State<BackendLoadModel>) -> impl IntoResponse {
    model.reset();
    JsonResponse(ResetDone {
        backend_id: model.id().clone(),
        message: "Reset to baseline",
        base_latency: model.base_latency_ms(),
    })
}
