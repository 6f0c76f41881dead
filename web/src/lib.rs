use log::*;
use service::AppState;
use std::net::SocketAddr;
use tokio::net::TcpListener;

mod controller;
mod error;
pub(crate) mod extractors;
pub mod router;
mod sse;

pub use error::{Error, Result};

/// Binds the configured interface and serves the router until `shutdown`
/// resolves. Open streams are closed through the streaming service before
/// this returns.
pub async fn init_server(
    app_state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let interface = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let server_url = format!("{interface}:{}", app_state.config.port);
    let listener = TcpListener::bind(&server_url).await?;
    info!("Server starting... listening for connections on http://{server_url}");

    let streaming = app_state.streaming.clone();
    let app = router::define_routes(app_state.clone()).layer(router::cors_layer(&app_state.config));

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let streaming = streaming.clone();
        async move {
            shutdown.await;
            // Live streams must close before axum waits on in-flight responses.
            streaming.shutdown().await;
        }
    })
    .await;

    streaming.shutdown().await;
    result
}
