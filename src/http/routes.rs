//! Station-mode HTTP route definitions (spec §6)
//!
//! Grounded on `http/routes.rs::build_router`: CORS + trace layering, an
//! `AppError` `IntoResponse` for the HTTP-visible error subset. JWT auth
//! and the payment/matchmaking/inventory routes have no counterpart here
//! and are not carried over.

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::ws::handler::ws_handler;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST]);

    // `/ws` is mounted as its own sub-router so the upgrade handler can
    // keep the narrower `State<Arc<Router>>` it was written against.
    let ws_routes = Router::new().route("/ws", get(ws_handler)).with_state(state.router.clone());

    Router::new()
        .merge(ws_routes)
        .route("/", get(status_page))
        .route("/api/status", get(api_status))
        .route("/api/peers", get(get_peers).post(post_peers))
        .route("/clean", post(clean))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn status_page() -> Html<&'static str> {
    Html("<!DOCTYPE html><html><body><h1>RayZ endpoint</h1><p>station mode</p></body></html>")
}

#[derive(Serialize)]
struct ApiStatus {
    wifi: bool,
    ip: String,
    channel: u8,
    peers: String,
    espnow_peers: u8,
}

async fn api_status(State(state): State<AppState>) -> Json<ApiStatus> {
    Json(ApiStatus {
        wifi: state.supervisor.wifi_connected(),
        ip: state.supervisor.wifi_ip().unwrap_or_default(),
        channel: state.peers.current_channel(),
        peers: String::new(),
        espnow_peers: state.peers.peer_count(),
    })
}

async fn get_peers(State(state): State<AppState>) -> Json<PeerCountResponse> {
    Json(PeerCountResponse { count: state.peers.peer_count() })
}

#[derive(Serialize)]
struct PeerCountResponse {
    count: u8,
}

#[derive(Deserialize)]
struct PostPeersBody {
    csv: String,
}

async fn post_peers(State(state): State<AppState>, Json(body): Json<PostPeersBody>) -> Result<StatusCode, AppError> {
    state
        .peers
        .load_peers_from_csv(&body.csv, crate::clock::now_ms())
        .map_err(AppError::BadRequest)?;
    Ok(StatusCode::OK)
}

async fn clean(State(state): State<AppState>) -> StatusCode {
    state.supervisor.factory_reset()
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
