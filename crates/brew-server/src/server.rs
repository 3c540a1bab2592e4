//! `BrewServer`: Axum HTTP + WebSocket front door.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use brew_core::{KettleError, KettleId, Response as Ack};
use brew_settings::BrewSettings;
use brew_store::{KettleRecord, KettleStore, Location};

use crate::connection::{serve_drinker, ConnectionLimits};
use crate::directory;
use crate::drinker::{Drinker, DrinkerAgent};
use crate::error::ApiError;
use crate::hub::Hub;
use crate::kettle::{KettleConfig, RoundSnapshot};
use crate::mirror::{spawn_mirror, MirrorConfig};
use crate::notify::Notifier;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub store: Arc<dyn KettleStore>,
    pub limits: ConnectionLimits,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub kettles: usize,
    /// Open drinker connections.
    pub connections: usize,
    /// Round changes queued for the store but not yet applied.
    pub mirror_backlog: usize,
}

impl HealthResponse {
    fn from_state(state: &AppState) -> Self {
        Self {
            status: if state.shutdown.is_shutting_down() {
                "draining"
            } else {
                "ok"
            },
            uptime_secs: state.start_time.elapsed().as_secs(),
            kettles: state.hub.kettle_count(),
            connections: state.shutdown.connection_count(),
            mirror_backlog: state.hub.mirror_backlog(),
        }
    }
}

/// The kettle server.
pub struct BrewServer {
    settings: BrewSettings,
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
    mirror_task: Mutex<Option<JoinHandle<()>>>,
}

impl BrewServer {
    /// Create a server and start its mirror worker. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        settings: BrewSettings,
        store: Arc<dyn KettleStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (mirror, mirror_task) = spawn_mirror(
            store.clone(),
            notifier,
            MirrorConfig {
                notify_radius_metres: settings.kettle.notify_radius_metres,
                ..MirrorConfig::default()
            },
            shutdown.token(),
        );
        let hub = Hub::with_mirror(KettleConfig::from(&settings.kettle), mirror);

        let state = AppState {
            hub,
            store,
            limits: ConnectionLimits::from(&settings.connection),
            start_time: Instant::now(),
            metrics,
            shutdown: shutdown.clone(),
        };

        Self {
            settings,
            state,
            shutdown,
            mirror_task: Mutex::new(Some(mirror_task)),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/new/{kettle_name}/{drinker_name}", get(ws_new_handler))
            .route("/ws/{kettle_id}/{drinker_name}", get(ws_join_handler))
            .route("/users", post(directory::register_participant))
            .route("/kettles", post(directory::register_kettle))
            .route("/kettles/list", post(directory::list_nearby_kettles))
            .route("/kettles/{kettle_id}", get(kettle_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in the background. Returns the bound address and the
    /// serve task, which ends once [`BrewServer::graceful_shutdown`] runs.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "brew server listening");
        Ok((local_addr, handle))
    }

    /// Stop accepting, then wait for live connections to send their close
    /// frames and for the mirror worker to drain. Returns `false` if the
    /// shutdown timeout cut the wait short.
    pub async fn graceful_shutdown(&self, server: JoinHandle<()>) -> bool {
        let mut background = vec![server];
        if let Some(task) = self.mirror_task.lock().take() {
            background.push(task);
        }
        let timeout = Duration::from_secs(self.settings.server.shutdown_timeout_secs);
        self.shutdown.drain(background, timeout).await
    }

    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// Which kettle an upgraded connection joins.
enum JoinTarget {
    New {
        name: String,
        location: Option<Location>,
    },
    Existing {
        id: KettleId,
        name: String,
    },
}

/// Optional `?long=&lat=` on `/ws/new`, so nearby participants can be told
/// about offers in the new kettle.
#[derive(Debug, Deserialize)]
struct NewKettleQuery {
    long: Option<f64>,
    lat: Option<f64>,
}

/// GET /ws/new/{kettle_name}/{drinker_name}
async fn ws_new_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path((kettle_name, drinker_name)): Path<(String, String)>,
    Query(query): Query<NewKettleQuery>,
    State(state): State<AppState>,
) -> Response {
    let location = match directory::optional_location(query.long, query.lat) {
        Ok(location) => location,
        Err(e) => return e.into_response(),
    };
    let target = JoinTarget::New {
        name: kettle_name,
        location,
    };
    match ws {
        Ok(ws) => upgrade(ws, state, target, drinker_name),
        Err(rejection) => rejection.into_response(),
    }
}

/// GET /ws/{kettle_id}/{drinker_name}
///
/// Joins the live kettle, or revives one the store still knows about.
async fn ws_join_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path((kettle_id, drinker_name)): Path<(KettleId, String)>,
    State(state): State<AppState>,
) -> Response {
    let kettle_name = match state.hub.lookup(&kettle_id) {
        Some(handle) => handle.name().to_string(),
        None => match state.store.get_kettle(&kettle_id).await {
            Ok(Some(record)) => record.name,
            Ok(None) => return ApiError::from(KettleError::NotFound(kettle_id)).into_response(),
            Err(e) => return ApiError::from(e).into_response(),
        },
    };
    match ws {
        Ok(ws) => upgrade(
            ws,
            state,
            JoinTarget::Existing {
                id: kettle_id,
                name: kettle_name,
            },
            drinker_name,
        ),
        Err(rejection) => rejection.into_response(),
    }
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, target: JoinTarget, drinker_name: String) -> Response {
    let limits = state.limits;
    ws.max_message_size(limits.max_message_size)
        .max_frame_size(limits.max_message_size)
        .on_upgrade(move |socket| {
            let shutdown = state.shutdown.clone();
            shutdown.track_connection(async move {
                if state.shutdown.is_shutting_down() {
                    debug!("upgrade completed after shutdown began, dropping socket");
                    return;
                }
                let (kettle_id, kettle_name) = match target {
                    JoinTarget::New { name, location } => {
                        let handle = state.hub.create(&name);
                        let mut record = KettleRecord::new(handle.id().clone(), name.as_str());
                        record.location = location;
                        if let Err(e) = state.store.upsert_kettle(record).await {
                            warn!(kettle_id = %handle.id(), error = %e, "failed to store new kettle");
                        }
                        (handle.id().clone(), name)
                    }
                    JoinTarget::Existing { id, name } => (id, name),
                };

                let (drinker, mailbox) = Drinker::new(drinker_name, limits.mailbox_capacity);
                // First frame on every connection names the kettle joined.
                let _ = drinker.send_response(&Ack::ok(kettle_id.as_str()));

                let handle = match state.hub.join(&kettle_id, &kettle_name, drinker.clone()).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(kettle_id = %kettle_id, kind = e.error_kind(), error = %e, "could not join kettle");
                        return;
                    }
                };

                serve_drinker(
                    socket,
                    DrinkerAgent::new(drinker, handle),
                    mailbox,
                    limits,
                    state.shutdown.token(),
                )
                .await;
            })
        })
}

/// GET /kettles/{kettle_id}
async fn kettle_handler(
    Path(kettle_id): Path<KettleId>,
    State(state): State<AppState>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    let snapshot = state.hub.get(&kettle_id)?.snapshot().await?;
    Ok(Json(snapshot))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_state(&state))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            brew_telemetry::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
