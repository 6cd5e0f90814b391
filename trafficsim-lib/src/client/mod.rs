//! centralized (web) client creation
//!
//! The dispatcher only depends on a `Service<Request>`,
//! tests swap this client out for in-process mock services.

use rama::{
    Layer as _, Service,
    error::{BoxError, ErrorContext as _},
    http::{
        Request, Response,
        client::{EasyHttpWebClient, HttpPooledConnectorConfig},
    },
    layer::MapErrLayer,
    rt::Executor,
};

/// Pool limits matching the dispatcher's connection slots,
/// so requests only ever queue on the slots where they are counted.
pub fn new_pool_config(max_connections: usize) -> HttpPooledConnectorConfig {
    let max_connections = max_connections.max(1);
    HttpPooledConnectorConfig {
        max_total: max_connections,
        max_active: max_connections,
        ..Default::default()
    }
}

/// Create a new pooled web client that can be cloned and shared.
///
/// Plain-text HTTP and HTTPS targets are both supported,
/// without any (egress) proxy support.
pub fn new_web_client(
    exec: Executor,
    max_connections: usize,
) -> Result<impl Service<Request, Output = Response, Error = BoxError> + Clone, BoxError> {
    let client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(exec)
        .try_with_connection_pool(new_pool_config(max_connections))
        .context("create connection pool for load web client")
        .context_field("max_connections", max_connections)?
        .build_client();

    Ok(MapErrLayer::new(BoxError::from).into_layer(client))
}
