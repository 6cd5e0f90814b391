#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, time::Duration};

use rama::{error::BoxError, graceful, telemetry::tracing};

#[cfg(target_family = "unix")]
use rama::error::ErrorContext as _;

use clap::{Parser, Subcommand};
use trafficsim_lib::utils;

pub mod cmd;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(test)]
pub mod test;

/// CLI arguments for running a traffic generator or a simulated backend.
#[derive(Debug, Clone, Parser)]
#[command(name = "trafficsim")]
#[command(bin_name = "trafficsim")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    cmds: CliCommands,

    /// log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    pub verbose: bool,

    /// multi-line human readable logs
    #[arg(long, default_value_t = false, global = true)]
    pub pretty: bool,

    /// append logs to this file instead of stderr
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    /// directory receiving `<name>.addr.txt` for every bound server
    #[arg(long, short = 'D', default_value = ".trafficsim", global = true)]
    pub data: PathBuf,

    #[arg(long, value_name = "SECONDS", default_value_t = 1., global = true)]
    /// seconds granted to in-flight requests on shutdown (<= 0.0 waits forever)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// open file limit to raise to, a generator needs one per pooled connection
    #[arg(long, value_name = "N", default_value_t = 262_144, global = true)]
    pub ulimit: utils::os::rlim_t,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommands {
    Generator(self::cmd::generator::GeneratorCommand),
    Backend(self::cmd::backend::BackendCommand),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    #[cfg(target_family = "unix")]
    utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Serve the generator or a backend until a signal arrives
/// or the command fails, then drain within the grace period.
///
/// The e2e tests call this with a signal that never fires.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (error_tx, error_rx) = tokio::sync::oneshot::channel::<BoxError>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(error_rx, base_shutdown_signal));

    graceful.spawn_task_fn(async move |guard| {
        let result = match args.cmds {
            CliCommands::Generator(generator_args) => {
                self::cmd::generator::exec(args.data, guard, generator_args).await
            }
            CliCommands::Backend(backend_args) => {
                self::cmd::backend::exec(args.data, guard, backend_args).await
            }
        };
        if let Err(err) = result {
            let _ = error_tx.send(err);
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    tracing::info!(?delay, "trafficsim stopped");
    Ok(())
}

fn new_shutdown_signal(
    error_rx: tokio::sync::oneshot::Receiver<BoxError>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("shutdown signal received");
            }
            result = error_rx => {
                match result {
                    Ok(err) => {
                        tracing::error!("command failed: {err}; shutting down");
                    },
                    Err(_) => {
                        tracing::debug!("command finished");
                    },
                }
            }
        }
    }
}
