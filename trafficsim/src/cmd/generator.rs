use std::{path::PathBuf, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::Uri,
    net::socket::Interface,
    rt::Executor,
    telemetry::tracing,
};

use clap::Args;
use trafficsim_lib::{
    client,
    dispatcher::{
        BackendSpec, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RPS, Dispatcher, DispatcherConfig,
        TargetPool, pacing::MIN_TICK_INTERVAL,
    },
    http::generator::new_control_svc,
    server::{self, HttpServeConfig},
};

#[derive(Debug, Clone, Args)]
/// run the rate-paced traffic generator and its control api
pub struct GeneratorCommand {
    /// network interface to bind the control api to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        env = "GENERATOR_BIND",
        default_value = "127.0.0.1:9500"
    )]
    pub bind: Interface,

    /// url of the proxy (or single backend) under load
    #[arg(
        long,
        value_name = "URL",
        env = "TARGET_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    pub target: Uri,

    #[arg(long = "backend", value_name = "ID=URL[,WEIGHT]")]
    /// spread load directly over weighted backends instead of the single target,
    /// can be repeated
    pub backends: Vec<BackendSpec>,

    /// upper bound accepted by the start operation
    #[arg(long, value_name = "RPS", env = "MAX_RPS", default_value_t = DEFAULT_MAX_RPS)]
    pub max_rps: u32,

    /// period of the dispatch timer
    #[arg(
        long,
        value_name = "DURATION",
        env = "TICK_INTERVAL",
        default_value = "5ms",
        value_parser = parse_tick_interval
    )]
    pub tick_interval: Duration,

    /// deadline of a single request, counted as a timeout when exceeded
    #[arg(
        long,
        value_name = "DURATION",
        env = "REQUEST_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub request_timeout: Duration,

    /// maximum of concurrently open outbound connections
    #[arg(
        long,
        value_name = "N",
        env = "MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS
    )]
    pub max_connections: usize,
}

pub async fn exec(
    data: PathBuf,
    guard: ShutdownGuard,
    args: GeneratorCommand,
) -> Result<(), BoxError> {
    tokio::fs::create_dir_all(&data)
        .await
        .context("create data directory")
        .with_context_debug_field("path", || data.clone())?;

    let pool = if args.backends.is_empty() {
        TargetPool::single(args.target)
    } else {
        TargetPool::try_new(args.backends)
    }
    .context("create target pool")?;

    let client =
        client::new_web_client(Executor::graceful(guard.clone()), args.max_connections)?;

    let cfg = DispatcherConfig {
        max_rps: args.max_rps,
        tick_interval: args.tick_interval,
        request_timeout: args.request_timeout,
        max_connections: args.max_connections,
    };
    tracing::info!(
        max_rps = cfg.max_rps,
        tick_interval_ms = cfg.tick_interval.as_millis() as u64,
        request_timeout_ms = cfg.request_timeout.as_millis() as u64,
        max_connections = cfg.max_connections,
        backends = pool.members().len(),
        "traffic generator configured"
    );

    let dispatcher = Dispatcher::new(guard.clone(), client, cfg, pool);

    server::serve_http(
        guard,
        HttpServeConfig {
            bind: args.bind,
            data: &data,
            name: "generator",
        },
        new_control_svc(dispatcher),
    )
    .await
}

fn parse_tick_interval(s: &str) -> Result<Duration, BoxError> {
    let interval = humantime::parse_duration(s)?;
    if interval < MIN_TICK_INTERVAL {
        return Err(BoxError::from(format!(
            "tick interval has to be at least {}",
            humantime::format_duration(MIN_TICK_INTERVAL)
        )));
    }
    Ok(interval)
}
