//! Operational HTTP surface: health, readiness, metrics, and cache
//! inspection, served next to the event socket.

use super::Server;
use crate::cache::CacheSummary;
use crate::metrics::MetricsSnapshot;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub shared_store: bool,
    pub write_worker: bool,
    pub pubsub_listener: bool,
    pub write_queue_size: usize,
    pub writes_processed: u64,
    pub writes_failed: u64,
    pub connections: u64,
}

/// Overall status plus per-subsystem flags.
pub async fn health(State(server): State<Arc<Server>>) -> Json<HealthResponse> {
    let shared_store = server.store.ping().await.is_ok();
    let write_worker = server.writer.is_running();
    let pubsub_listener = server.listener.is_running();
    let snapshot = server.metrics.snapshot();

    Json(HealthResponse {
        status: if shared_store && write_worker && pubsub_listener {
            "ok"
        } else {
            "degraded"
        },
        shared_store,
        write_worker,
        pubsub_listener,
        write_queue_size: server.writer.queue_depth(),
        writes_processed: snapshot.writes_processed,
        writes_failed: snapshot.writes_failed,
        connections: snapshot.connections,
    })
}

/// Readiness: both background tasks must have started.
pub async fn ready(State(server): State<Arc<Server>>) -> impl IntoResponse {
    if server.listener.is_running() && server.writer.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub write_queue_size: usize,
}

/// The counters, machine-readable.
pub async fn metrics(State(server): State<Arc<Server>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        counters: server.metrics.snapshot(),
        write_queue_size: server.writer.queue_depth(),
    })
}

#[derive(Debug, Serialize)]
pub struct CacheResponse {
    pub lists: Vec<CacheSummary>,
}

/// Current L1 summary.
pub async fn cache(State(server): State<Arc<Server>>) -> Json<CacheResponse> {
    Json(CacheResponse {
        lists: server.state.cache_summaries(),
    })
}

/// Subscriber counts per list.
pub async fn rooms(State(server): State<Arc<Server>>) -> Json<HashMap<String, usize>> {
    Json(
        server
            .state
            .room_counts()
            .into_iter()
            .map(|(list_id, count)| (list_id.to_string(), count))
            .collect(),
    )
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub flushed: Vec<String>,
}

/// `POST /cache/flush`: drop L1 and this node's L2 entries for manual
/// recovery. Reads after this rebuild from the durable store.
pub async fn cache_flush(State(server): State<Arc<Server>>) -> impl IntoResponse {
    match server.coordinator.flush_caches().await {
        Ok(flushed) => {
            log::info!("cache flush dropped {} entries", flushed.len());
            (
                StatusCode::OK,
                Json(FlushResponse {
                    flushed: flushed.iter().map(|id| id.to_string()).collect(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            log::error!("cache flush failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.client_message()).into_response()
        }
    }
}
