//! WebSocket session handling.
//!
//! Each session gets two tasks: this inbound loop, which processes one
//! event at a time so long handler work never reorders a session's
//! writes, and an outbound forwarder that drains the session's event
//! channel into the socket and keeps the peer alive with pings.

use super::handlers;
use super::Server;
use crate::auth::parse_bearer;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::protocol::ServerEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrade handler for `GET /ws`. The bearer token rides the
/// `Authorization` header or a `token` query parameter; verification
/// happens after the upgrade so the failure reaches the client as an
/// `auth_error` frame before the socket closes.
pub async fn ws_handler(
    State(server): State<Arc<Server>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer)
        .map(str::to_string)
        .or_else(|| params.get("token").cloned());

    ws.on_upgrade(move |socket| handle_socket(server, socket, token))
}

async fn handle_socket(server: Arc<Server>, mut socket: WebSocket, token: Option<String>) {
    let user_id = token
        .ok_or_else(|| EngineError::Auth("no bearer token presented".to_string()))
        .and_then(|token| server.verifier.verify(&token));

    let user_id = match user_id {
        Ok(user_id) => user_id,
        Err(err) => {
            log::warn!("handshake rejected: {}", err);
            let frame = ServerEvent::from_error(&err).to_frame();
            let _ = socket.send(Message::Text(frame)).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let session_id = Uuid::new_v4();
    let (sender, mut outbound) = tokio::sync::mpsc::unbounded_channel();
    server
        .state
        .add_connection(session_id, user_id.clone(), sender);
    Metrics::incr(&server.metrics.connections);
    Metrics::incr(&server.metrics.connections_total);
    log::info!("session {} opened for user {}", session_id, user_id);

    server.state.deliver_to_session(
        session_id,
        ServerEvent::Connected {
            user_id: user_id.clone(),
            session_id: session_id.to_string(),
        },
    );

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                event = outbound.recv() => match event {
                    Some(event) => {
                        if sink.send(Message::Text(event.to_frame())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = keepalive.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // One inbound event at a time per session.
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => handlers::dispatch(&server, session_id, &text).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    send_task.abort();
    server.state.remove_connection(session_id);
    Metrics::decr(&server.metrics.connections);
    log::info!("session {} closed", session_id);
}
