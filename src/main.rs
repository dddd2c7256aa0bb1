use std::sync::Arc;

use warp::Filter;

use relay_server::api::relay_routes;
use relay_server::config::Config;
use relay_server::relay::RelayServer;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let server = Arc::new(RelayServer::new());

    let routes = relay_routes::live_websocket_route(server.clone())
        .or(relay_routes::live_health_check())
        .or(relay_routes::live_status(server))
        .or(relay_routes::live_config_endpoint());

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting live relay server"
    );

    warp::serve(routes).run(config.bind_address()).await;
}
