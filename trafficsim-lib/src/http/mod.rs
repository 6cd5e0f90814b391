//! HTTP surfaces of the simulator processes.

use rama::http::{
    Response, StatusCode,
    service::web::response::{IntoResponse as _, Json},
};
use serde::Serialize;

pub mod backend;
pub mod generator;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}
