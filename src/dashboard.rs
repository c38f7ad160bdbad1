use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

use crate::report::sessions_csv;
use crate::tracker::TrackerHandle;

/// Read-only view of a running tracker
pub fn router(tracker: TrackerHandle) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .route("/sessions.csv", get(csv_handler))
        .with_state(tracker)
}

pub async fn start_dashboard(tracker: TrackerHandle, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    log::info!("[DASHBOARD] Serving live status at http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router(tracker)).await
}

async fn status_handler(State(tracker): State<TrackerHandle>) -> impl IntoResponse {
    match tracker.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn csv_handler(State(tracker): State<TrackerHandle>) -> impl IntoResponse {
    match tracker.snapshot().await {
        Ok(state) => (
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            sessions_csv(&state.sessions),
        )
            .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(tracker): State<TrackerHandle>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, tracker))
}

async fn handle_socket(mut socket: WebSocket, tracker: TrackerHandle) {
    // Push loop, once per second until either side goes away
    loop {
        let status = match tracker.status().await {
            Ok(status) => status,
            Err(_) => break,
        };

        let json = match serde_json::to_string(&status) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("[DASHBOARD] Failed to encode status: {}", e);
                break;
            }
        };
        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }

        sleep(Duration::from_secs(1)).await;
    }
}
