use std::sync::Arc;

use warp::Filter;

use super::relay_websocket;
use crate::relay::RelayServer;

/// Creates the live WebSocket route
pub fn live_websocket_route(
    server: Arc<RelayServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::ws())
        .and(with_relay_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<RelayServer>| {
            ws.on_upgrade(move |websocket| {
                relay_websocket::handle_live_websocket(websocket, server)
            })
        })
}

pub fn live_health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
{
    warp::path("live")
        .and(warp::path("health"))
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Live Relay Server",
                "version": "1.0.0"
            }))
        })
}

/// Exposes the current live occupancy (teacher, audio flag, observer count)
pub fn live_status(
    server: Arc<RelayServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::path("status"))
        .and(warp::get())
        .and(with_relay_server(server))
        .and_then(|server: Arc<RelayServer>| async move {
            Ok::<_, warp::Rejection>(warp::reply::json(&server.status().await))
        })
}

pub fn live_config_endpoint(
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("live")
        .and(warp::path("config"))
        .and(warp::get())
        .map(|| {
            use std::env;

            let config = serde_json::json!({
                "LIVE_WEBSOCKET_URL": env::var("LIVE_WEBSOCKET_URL").ok(),
                "UPLOAD_SERVICE_URL": env::var("UPLOAD_SERVICE_URL").ok(),
                "RECORDS_SERVICE_URL": env::var("RECORDS_SERVICE_URL").ok(),
                "TEACHER_UI_URL": env::var("TEACHER_UI_URL").ok(),
                "STUDENT_UI_URL": env::var("STUDENT_UI_URL").ok()
            });

            warp::reply::json(&config)
        })
}

fn with_relay_server(
    server: Arc<RelayServer>,
) -> impl Filter<Extract = (Arc<RelayServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}
