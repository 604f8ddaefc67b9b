//! Route-Definitionen fuer das Relay
//!
//! - `GET  /`          – WebSocket-Upgrade
//! - `POST /subscribe` – Webhook fuer ein Topic registrieren
//! - `GET  /health`    – 204 ohne Inhalt
//! - `GET  /hello`     – Begruessungstext mit Version

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection;
use crate::error::RelayError;
use crate::server::RelayState;

/// Erstellt den vollstaendigen Router
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(websocket))
        .route("/subscribe", post(webhook_registrieren))
        .route("/health", get(health))
        .route("/hello", get(hello))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| connection::verarbeiten(state, socket, peer))
}

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub topic: String,
    pub webhook: String,
}

/// POST /subscribe – Webhook registrieren
pub async fn webhook_registrieren(
    State(state): State<RelayState>,
    body: Result<Json<WebhookBody>, JsonRejection>,
) -> Response {
    let ergebnis = body
        .map_err(|e| RelayError::parameter(e.body_text()))
        .and_then(|Json(b)| state.webhooks.registrieren(&b.topic, &b.webhook));

    match ergebnis {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(e) => (
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_REQUEST),
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /health – Health-Check-Endpunkt
pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// GET /hello
pub async fn hello() -> String {
    format!(
        "Hello World, this is Tandem Relay v{}",
        env!("CARGO_PKG_VERSION")
    )
}
