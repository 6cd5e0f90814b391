use std::{convert::Infallible, path::Path, sync::Arc, time::Duration};

use rama::{
    Layer as _, Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue, Request, Response,
        layer::{
            cors::CorsLayer, required_header::AddRequiredResponseHeadersLayer,
            trace::TraceLayer,
        },
        server::HttpServer,
    },
    layer::TimeoutLayer,
    net::{address::SocketAddress, socket::Interface},
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use crate::utils::env::network_service_identifier;

/// Plain-text HTTP server settings shared by the generator and the backend.
#[derive(Debug, Clone)]
pub struct HttpServeConfig<'a> {
    pub bind: Interface,
    /// directory in which the bound address is written as `<name>.addr.txt`
    pub data: &'a Path,
    pub name: &'a str,
}

/// Bind and serve `svc` until the guard is cancelled.
///
/// Responses allow any origin and preflight requests are answered
/// directly, so a browser dashboard can drive both processes.
pub async fn serve_http<S>(
    guard: ShutdownGuard,
    cfg: HttpServeConfig<'_>,
    svc: S,
) -> Result<(), BoxError>
where
    S: Service<Request, Output = Response, Error = Infallible>,
{
    let http_svc = (
        TraceLayer::new_for_http(),
        CorsLayer::permissive(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(network_service_identifier())),
    )
        .into_layer(svc);

    let exec = Executor::graceful(guard);
    let http_server = HttpServer::auto(exec.clone()).service(Arc::new(http_svc));
    let tcp_svc = TimeoutLayer::new(Duration::from_secs(60)).into_layer(http_server);

    let tcp_listener = TcpListener::bind(cfg.bind, exec)
        .await
        .context("bind http server")
        .context_field("name", cfg.name.to_owned())?;

    let addr = tcp_listener
        .local_addr()
        .context("get bound address for http server")?;

    tracing::info!(server.name = cfg.name, "http server bound to: {addr}");
    write_server_socket_address_as_file(cfg.data, cfg.name, addr.into()).await?;

    tcp_listener.serve(tcp_svc).await;

    Ok(())
}

pub async fn write_server_socket_address_as_file(
    dir: &Path,
    name: &str,
    addr: SocketAddress,
) -> Result<(), BoxError> {
    let path = dir.join(format!("{name}.addr.txt"));
    tokio::fs::write(&path, addr.to_string())
        .await
        .context("write server's socket address to file")
        .context_field("address", addr)
        .with_context_debug_field("path", || path.to_owned())
}
