//! HTTP server implementation for the API

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::models::{HealthInfo, StreamFrame};
use crate::control::{Controller, Reply};
use crate::engine::InstanceId;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Controller,
}

/// Build the router over a controller
pub fn router(controller: Controller) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        // Control surface: any action, same envelope as in-process callers get
        .route("/api/message", post(message_handler))
        .route("/api/scenarios", get(list_scenarios_handler))
        .route(
            "/api/instances",
            get(list_instances_handler).delete(prune_instances_handler),
        )
        .route("/api/instances/:id", get(instance_status_handler))
        .route("/api/instances/:id/cancel", post(cancel_instance_handler))
        .route("/api/logs", get(logs_handler).delete(clear_logs_handler))
        .route("/api/results", get(results_handler))
        .route("/ws", get(websocket_handler))
        .with_state(AppState { controller })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Configure and start the HTTP server
pub async fn start_http_server(controller: Controller, host: &str, port: u16) -> Result<()> {
    let app = router(controller);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("🌐 API server listening on http://{}:{}", host, port);
    info!("🔗 WebSocket endpoint available at ws://{}:{}/ws", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn reply(reply: Reply) -> impl IntoResponse {
    let status = match &reply {
        Reply::Error { .. } => StatusCode::BAD_REQUEST,
        Reply::Started { .. } => StatusCode::ACCEPTED,
        Reply::Success(_) => StatusCode::OK,
    };
    (status, Json(reply))
}

fn json_error(status: StatusCode, message: impl ToString) -> axum::response::Response {
    (status, Json(serde_json::json!({"error": message.to_string()}))).into_response()
}

fn json_ok<T: Serialize>(body: T) -> axum::response::Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.controller.engine();
    let active_instances = engine
        .instances()
        .iter()
        .filter(|instance| !instance.status.is_terminal())
        .count();

    Json(HealthInfo {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        scenarios: engine.registry().len(),
        active_instances,
    })
}

async fn message_handler(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    reply(state.controller.handle(payload).await)
}

async fn list_scenarios_handler(State(state): State<AppState>) -> impl IntoResponse {
    json_ok(state.controller.engine().registry().list())
}

async fn list_instances_handler(State(state): State<AppState>) -> impl IntoResponse {
    json_ok(state.controller.engine().instances())
}

/// Drop every finished instance
async fn prune_instances_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pruned = state.controller.engine().prune_finished();
    json_ok(serde_json::json!({"pruned": pruned}))
}

async fn instance_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = id.parse::<InstanceId>() else {
        return json_error(StatusCode::BAD_REQUEST, format!("Invalid instance id: {}", id));
    };

    match state.controller.engine().status(id) {
        Ok(instance) => json_ok(instance),
        Err(e) => json_error(StatusCode::NOT_FOUND, e),
    }
}

async fn cancel_instance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = id.parse::<InstanceId>() else {
        return json_error(StatusCode::BAD_REQUEST, format!("Invalid instance id: {}", id));
    };

    match state.controller.engine().cancel(id) {
        Ok(cancelled) => json_ok(serde_json::json!({"cancelled": cancelled})),
        Err(e) => json_error(StatusCode::NOT_FOUND, e),
    }
}

async fn logs_handler(State(state): State<AppState>) -> impl IntoResponse {
    json_ok(state.controller.journal().entries())
}

async fn clear_logs_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.journal().clear();
    StatusCode::NO_CONTENT
}

async fn results_handler(State(state): State<AppState>) -> impl IntoResponse {
    reply(
        state
            .controller
            .handle(serde_json::json!({"action": "getResults"}))
            .await,
    )
}

/// WebSocket handler for live log and run events
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, state))
}

async fn send_frame(socket: &mut WebSocket, frame: StreamFrame) -> bool {
    match serde_json::to_string(&frame) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode stream frame: {}", e);
            true
        }
    }
}

/// Handle WebSocket connections
async fn websocket_connection(mut socket: WebSocket, state: AppState) {
    info!("🔌 New WebSocket connection established");

    let mut logs = state.controller.journal().subscribe();
    let mut runs = state.controller.engine().subscribe();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            let pong = Message::Text("pong".to_string());
                            if socket.send(pong).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("🔌 WebSocket connection closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            event = logs.recv() => {
                match event {
                    Ok(event) => {
                        if !send_frame(&mut socket, StreamFrame::Log(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket log stream lagged by {} entries", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            event = runs.recv() => {
                match event {
                    Ok(event) => {
                        if !send_frame(&mut socket, StreamFrame::Run(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket run stream lagged by {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("🔌 WebSocket connection ended");
}
