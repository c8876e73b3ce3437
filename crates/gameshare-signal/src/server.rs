//! HTTP surface of the signaling server: WebSocket upgrade endpoints plus
//! health and WebRTC configuration routes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gameshare_common::Result;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{signaling_url_for_bound_addr, IceServer, ServerConfig};
use crate::connection::serve_socket;
use crate::relay::{RelayEngine, SharedRelay};
use crate::session::RegistryStats;

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    relay: SharedRelay,
    config: Arc<ServerConfig>,
    active_connections: Arc<AtomicUsize>,
    signaling_url: Arc<str>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let signaling_url = config
            .public_url
            .clone()
            .unwrap_or_else(|| signaling_url_for_bound_addr(config.bind_addr()));
        Self {
            relay: RelayEngine::shared(config.relay_policy()),
            config: Arc::new(config),
            active_connections: Arc::new(AtomicUsize::new(0)),
            signaling_url: signaling_url.into(),
        }
    }

    pub fn relay(&self) -> &SharedRelay {
        &self.relay
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    active_connections: usize,
    #[serde(flatten)]
    registry: RegistryStats,
}

#[derive(Debug, Serialize)]
struct WebRtcConfigResponse {
    ws_signaling_url: String,
    ice_servers: Vec<IceServer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/signaling", get(ws_handler))
        .route("/health", get(health))
        .route("/webrtc/config", get(webrtc_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let Some(ws) = ws else {
        return "GameShare signaling online".into_response();
    };

    let relay = state.relay.clone();
    let active = state.active_connections.clone();
    let outbox_capacity = state.config.outbox_capacity;
    let max_message_bytes = state.config.max_message_bytes;
    let default_session = params.session.filter(|id| !id.is_empty());

    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| async move {
            active.fetch_add(1, Ordering::Relaxed);
            serve_socket(socket, relay, outbox_capacity, addr, default_session).await;
            active.fetch_sub(1, Ordering::Relaxed);
        })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.relay.lock().await.registry().stats();
    Json(HealthResponse {
        active_connections: state.active_connections(),
        registry,
    })
}

async fn webrtc_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(WebRtcConfigResponse {
        ws_signaling_url: state.signaling_url.to_string(),
        ice_servers: state.config.ice_servers(),
    })
}

/// Periodically expire idle sessions until the relay is dropped.
fn spawn_idle_eviction(relay: SharedRelay, ttl: Duration) {
    let relay = Arc::downgrade(&relay);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(IDLE_SWEEP_INTERVAL.min(ttl));
        loop {
            interval.tick().await;
            let Some(relay) = relay.upgrade() else {
                break;
            };
            let evicted = relay.lock().await.evict_idle(ttl);
            if evicted > 0 {
                info!("expired {} idle sessions", evicted);
            }
        }
    });
}

/// Serve signaling on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, mut state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bound_addr = listener.local_addr()?;
    if state.config.public_url.is_none() {
        state.signaling_url = signaling_url_for_bound_addr(bound_addr).into();
    }
    info!("signaling listening on {}", bound_addr);
    info!("signaling url {}", state.signaling_url);

    if let Some(ttl) = state.config.idle_session_timeout() {
        info!("expiring sessions idle for more than {:?}", ttl);
        spawn_idle_eviction(state.relay.clone(), ttl);
    }

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, closing server");
}
