use rama::{
    error::BoxError,
    http::{
        Body, HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{ACCEPT, USER_AGENT},
    },
};
use rand::{RngExt as _, seq::IndexedRandom as _};

use crate::utils::env::unix_millis;

use super::pool::PoolMember;

pub const REQUEST_PATHS: &[&str] = &[
    "/api/test",
    "/api/health",
    "/api/data",
    "/users",
    "/products",
    "/orders",
];

pub const USER_AGENTS: &[&str] = &[
    "TrafficSimLoadTest/1.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
    "LoadGenerator/1.0",
];

pub const HEADER_NAME_X_LOAD_TEST: HeaderName = HeaderName::from_static("x-load-test");
pub const HEADER_NAME_X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// `gen-<unix millis>-<9 hex digits>`
pub fn new_request_id() -> String {
    let suffix: u64 = rand::rng().random_range(0..0x10_0000_0000);
    format!("gen-{}-{suffix:09x}", unix_millis())
}

/// Synthetic GET request for a random path on `target`.
pub fn new_load_request(target: &PoolMember) -> Result<Request, BoxError> {
    let mut rng = rand::rng();
    let path = REQUEST_PATHS.choose(&mut rng).copied().unwrap_or("/");
    let user_agent = USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(crate::utils::env::network_service_identifier());

    let req = Request::builder()
        .method(Method::GET)
        .uri(target.url_for(path))
        .header(USER_AGENT, HeaderValue::from_static(user_agent))
        .header(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"))
        .header(HEADER_NAME_X_LOAD_TEST, HeaderValue::from_static("true"))
        .header(HEADER_NAME_X_REQUEST_ID, new_request_id())
        .body(Body::empty())?;
    Ok(req)
}

pub fn is_success(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}
