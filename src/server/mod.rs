//! # Server
//!
//! The explicitly constructed server value that owns every process-wide
//! component: configuration, the state manager, the coordinator, the
//! permission service, the token verifier, the write worker, and the
//! pub/sub listener. Handlers receive it by `Arc`; there are no hidden
//! singletons.
//!
//! Shutdown tears components down in reverse order: stop accepting
//! connections, stop the pub/sub listener, drain the write worker, close
//! the stores.

pub mod handlers;
pub mod http;
pub mod ws;

use crate::auth::TokenVerifier;
use crate::cache::{Coordinator, StateManager};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::metrics::Metrics;
use crate::permissions::PermissionService;
use crate::pubsub::{self, ListenerHandle};
use crate::repository::{bootstrap_schema, DurableStore, SqlRepository};
use crate::store::SharedStore;
use crate::writer::{self, WriterHandle};
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// One collab node.
pub struct Server {
    pub config: Config,
    pub state: Arc<StateManager>,
    pub coordinator: Coordinator,
    pub permissions: PermissionService,
    pub verifier: TokenVerifier,
    pub metrics: Arc<Metrics>,
    pub writer: WriterHandle,
    pub listener: ListenerHandle,
    pub store: SharedStore,
    pub repo: Arc<dyn DurableStore>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Construct every component and start the background tasks.
    ///
    /// Fails (and the process exits 1) when the auth secret is missing,
    /// or either store is unreachable.
    pub async fn new(config: Config) -> Result<Self> {
        log::info!("connecting to durable store");
        let sql = SqlRepository::connect(
            &config.durable_store_url,
            config.durable_store_key.as_deref(),
        )
        .await?;
        bootstrap_schema(sql.pool()).await?;
        let repo: Arc<dyn DurableStore> = Arc::new(sql);

        log::info!("connecting to shared store at {}", config.shared_store_url);
        let store = SharedStore::connect(&config.shared_store_url, &config.pubsub_channel).await?;
        store.ping().await?;

        let metrics = Arc::new(Metrics::new());
        let state = Arc::new(StateManager::new());

        let (writer, writer_join) = writer::spawn(
            repo.clone(),
            metrics.clone(),
            config.writer_queue_size,
            config.writer_shutdown_drain,
        );
        let (listener, listener_join) =
            pubsub::spawn(state.clone(), store.clone(), metrics.clone());

        let coordinator =
            Coordinator::new(state.clone(), store.clone(), repo.clone(), writer.clone());
        let permissions = PermissionService::new(repo.clone());
        let verifier = TokenVerifier::new(&config.auth_secret);

        Ok(Self {
            config,
            state,
            coordinator,
            permissions,
            verifier,
            metrics,
            writer,
            listener,
            store,
            repo,
            background: Mutex::new(vec![writer_join, listener_join]),
        })
    }

    /// The full router: the event socket plus the operational surface.
    pub fn router(self: &Arc<Self>) -> Router {
        let cors = if self.config.cors_origins.iter().any(|origin| origin == "*") {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<_> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/ws", get(ws::ws_handler))
            .route("/health", get(http::health))
            .route("/ready", get(http::ready))
            .route("/metrics", get(http::metrics))
            .route("/cache", get(http::cache))
            .route("/rooms", get(http::rooms))
            .route("/cache/flush", post(http::cache_flush))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Serve until interrupted, then shut down cleanly.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let address = self.config.bind_address();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| EngineError::Internal(format!("cannot bind {}: {}", address, e)))?;
        log::info!("listening on {} (env: {})", address, self.config.env);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| EngineError::Internal(format!("server error: {}", e)))?;

        self.shutdown().await;
        Ok(())
    }

    /// Reverse-order teardown of the background tasks.
    pub async fn shutdown(&self) {
        log::info!("shutting down");
        self.listener.shutdown();
        self.writer.shutdown();

        let joins: Vec<_> = self.background.lock().drain(..).collect();
        for join in joins {
            // The writer bounds its own drain; this timeout is a backstop.
            let grace = self.config.writer_shutdown_drain + Duration::from_secs(1);
            if tokio::time::timeout(grace, join).await.is_err() {
                log::warn!("background task did not stop within {:?}", grace);
            }
        }
        log::info!("shutdown complete");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("cannot listen for shutdown signal: {}", err);
    }
}
