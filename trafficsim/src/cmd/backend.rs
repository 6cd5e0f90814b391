use std::path::PathBuf;

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    net::socket::Interface,
    telemetry::tracing,
    utils::str::arcstr::ArcStr,
};

use clap::Args;
use trafficsim_lib::{
    backend::{BackendConfig, BackendLoadModel},
    http::backend::BackendHttpService,
    server::{self, HttpServeConfig},
};

#[derive(Debug, Clone, Args)]
/// run a simulated backend with a load dependent latency and error profile
pub struct BackendCommand {
    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        env = "BACKEND_BIND",
        default_value = "127.0.0.1:10000"
    )]
    pub bind: Interface,

    /// identifier reported in every response
    #[arg(long, env = "BACKEND_ID", default_value = "backend-unknown")]
    pub id: String,

    /// latency of an idle backend, in milliseconds
    #[arg(long, value_name = "MS", env = "BASE_LATENCY_MS", default_value_t = 0)]
    pub base_latency_ms: u64,

    /// concurrent requests served before rejecting with 503
    #[arg(
        long,
        value_name = "N",
        env = "MAX_CAPACITY",
        default_value_t = 100,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_capacity: u32,
}

pub async fn exec(
    data: PathBuf,
    guard: ShutdownGuard,
    args: BackendCommand,
) -> Result<(), BoxError> {
    tokio::fs::create_dir_all(&data)
        .await
        .context("create data directory")
        .with_context_debug_field("path", || data.clone())?;

    let model = BackendLoadModel::new(BackendConfig {
        id: ArcStr::from(args.id.as_str()),
        base_latency_ms: args.base_latency_ms,
        max_capacity: args.max_capacity,
    });
    tracing::info!(
        backend.id = %args.id,
        base_latency_ms = args.base_latency_ms,
        max_capacity = args.max_capacity,
        "simulated backend configured"
    );

    // one data dir can hold several backends
    let name = format!("backend.{}", args.id);
    server::serve_http(
        guard,
        HttpServeConfig {
            bind: args.bind,
            data: &data,
            name: &name,
        },
        BackendHttpService::new(model),
    )
    .await
}
