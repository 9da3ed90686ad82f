use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{header, HeaderMap, Method},
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use parley_shared::constants::{ACCESS_TOKEN_QUERY, DEVICE_NAME_HEADER, HUB_PATH, PROTOCOL_VERSION};
use parley_shared::types::{ConnectionId, UserId};
use parley_shared::{ClientFrame, HubError, HubErrorKind, ServerFrame};

use crate::error::ApiError;
use crate::hub::Hub;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub rate_limiter: RateLimiter,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(HUB_PATH, get(hub_upgrade))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        connections: state.hub.registry().connection_count(),
    })
}

/// Upgrade to the hub protocol. A valid bearer token binds the connection
/// to its user straight away; no token leaves it anonymous, so it can still
/// `Register` or `Login`. A bad token is refused before the upgrade.
async fn hub_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = match bearer_token(&headers, query.get(ACCESS_TOKEN_QUERY).map(String::as_str)) {
        Some(token) => Some(
            state
                .hub
                .tokens()
                .verify(token)
                .map_err(|e| ApiError::Unauthorized(e.to_string()))?,
        ),
        None => None,
    };

    let device_name = match headers.get(DEVICE_NAME_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("{DEVICE_NAME_HEADER} is not valid text")))?
            .trim()
            .to_string(),
        None => String::new(),
    };
    let device_name = Some(device_name).filter(|name| !name.is_empty());

    Ok(ws.on_upgrade(move |socket| serve_connection(socket, state, user, device_name)))
}

/// Query parameter first (browsers cannot set headers on a WebSocket
/// handshake), then `Authorization: Bearer`.
fn bearer_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    query
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty())
        })
}

/// Pump one hub connection until either side closes it.
///
/// Requests are handled one at a time in arrival order. Responses and pushed
/// events share the connection's outbound queue, which a writer task drains
/// into the socket.
async fn serve_connection(
    socket: WebSocket,
    state: AppState,
    user: Option<UserId>,
    device_name: Option<String>,
) {
    let conn = ConnectionId::new();
    let registry = state.hub.registry().clone();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(state.outbound_buffer);

    registry.register(conn, tx.clone(), device_name.clone());
    if let Some(user) = user {
        registry.bind(conn, user);
    }
    info!(conn = %conn, user = ?user, device = ?device_name, "hub connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(conn = %conn, error = %e, "failed to encode frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn, error = %e, "hub socket error");
                break;
            }
        };

        let reply = match ClientFrame::from_json(&text) {
            Ok(frame) => {
                let result = state.hub.handle(conn, frame.request).await;
                ServerFrame::Response {
                    id: frame.id,
                    result,
                }
            }
            Err(e) => {
                warn!(conn = %conn, error = %e, "malformed hub frame");
                match frame_id(&text) {
                    Some(id) => ServerFrame::Response {
                        id,
                        result: Err(HubError::new(HubErrorKind::Validation, "Malformed request")),
                    },
                    None => continue,
                }
            }
        };

        if tx.send(reply).await.is_err() {
            break;
        }
    }

    registry.deregister(conn);
    drop(tx);
    writer.abort();
    info!(conn = %conn, "hub connection closed");
}

/// Salvage the correlation id from a frame that did not parse.
fn frame_id(text: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("id")?
        .as_u64()
}

pub async fn serve(
    state: AppState,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting hub server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
