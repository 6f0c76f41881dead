use config::Config;
use domain::ShipmentBoard;
use log::info;
use sse::StreamingService;
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state shared by every request handler
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub streaming: Arc<StreamingService>,
    pub shipments: Arc<ShipmentBoard>,
}

impl AppState {
    pub fn new(app_config: Config) -> Self {
        let streaming_config = app_config.streaming_config();
        info!(
            "Streaming config: poll_interval={:?}, stream_timeout={:?}, max_connections={}, \
             max_connections_per_user={}, heartbeat={} every {:?}",
            streaming_config.poll_interval,
            streaming_config.stream_timeout,
            streaming_config.max_connections,
            streaming_config.max_connections_per_user,
            streaming_config.enable_heartbeat,
            streaming_config.heartbeat_interval,
        );

        Self {
            streaming: Arc::new(StreamingService::new(streaming_config)),
            shipments: Arc::new(ShipmentBoard::new()),
            config: app_config,
        }
    }
}
