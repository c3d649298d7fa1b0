//! HTTP surface of the control server.

mod console_routes;
mod health;
mod protocol_routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use mirage_crypto::StaticKeyPair;
use tower_http::trace::TraceLayer;

use crate::console::ConsoleService;
use crate::protocol::ProtocolHandler;
use crate::storage::ControlDatabase;

pub use protocol_routes::MACHINE_KEY_HEADER;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: ControlDatabase,
    pub protocol: Arc<ProtocolHandler>,
    pub console: Arc<ConsoleService>,
    pub server_key: Arc<StaticKeyPair>,
}

/// Build the router. Protocol endpoints answer only `POST`; axum replies
/// `405` for any other method.
pub fn build_router(state: AppState, max_payload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/machine/register", post(protocol_routes::machine_register))
        .route("/machine/map", post(protocol_routes::machine_map))
        .route("/navi/register", post(protocol_routes::navi_register))
        .route("/navi/poll", post(protocol_routes::navi_poll))
        .route("/console/login", post(console_routes::login))
        .route("/console/logout", post(console_routes::logout))
        .route("/console/machines", get(console_routes::list_machines))
        .route("/console/machines/update", post(console_routes::update_machine))
        .route("/console/machines/remove", post(console_routes::remove_machine))
        .layer(DefaultBodyLimit::max(max_payload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
