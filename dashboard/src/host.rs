use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use plant_common::{
    CommandKind, ConnectionMonitor, DashboardConfig, DispatchError, LoopState, OperatorReference,
    TelemetryStore, TransportKind,
};

use crate::{
    dispatcher::CommandDispatcher,
    ingest::IngestLoop,
    settings::load_config,
    transport::{HttpTransport, MqttTransport, Transport},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    store: Arc<TelemetryStore>,
    connection: Arc<ConnectionMonitor>,
    reference: Arc<OperatorReference>,
    dispatcher: Arc<CommandDispatcher>,
    loop_state: watch::Receiver<LoopState>,
    transport: TransportKind,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    kind: CommandKind,
    #[serde(default)]
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    transport: &'static str,
    connection: &'static str,
    #[serde(rename = "connectionError")]
    connection_error: Option<String>,
    #[serde(rename = "loopState")]
    loop_state: &'static str,
    buffered: usize,
    capacity: usize,
    #[serde(rename = "referenceTemperature")]
    reference_temperature: f64,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    info!(
        "starting plant dashboard with {} transport",
        config.transport.as_str()
    );

    let store = Arc::new(TelemetryStore::new(config.ingest.capacity));
    let connection = Arc::new(ConnectionMonitor::new());
    let reference = Arc::new(OperatorReference::default());
    let transport = build_transport(&config, &connection, &reference)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestLoop::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        Arc::clone(&connection),
        poll_interval(&config),
        config.ingest.backoff_interval(),
        shutdown_rx,
    );
    let loop_state = ingest.state();
    let ingest_task = ingest.spawn();

    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&transport),
        config.active_encoding().clone(),
        Arc::clone(&reference),
    ));

    let app_state = AppState {
        store,
        connection,
        reference,
        dispatcher,
        loop_state,
        transport: config.transport,
    };

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid server bind address {}", config.server.bind))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dashboard server at {addr}"))?;

    info!("dashboard api listening on http://{addr}");
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down ingestion");
    let _ = shutdown_tx.send(true);
    transport.close();
    match tokio::time::timeout(SHUTDOWN_GRACE, ingest_task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("ingestion task ended abnormally: {err}"),
        Err(_) => warn!("ingestion task still running after {SHUTDOWN_GRACE:?}"),
    }
    Ok(())
}

fn build_transport(
    config: &DashboardConfig,
    connection: &Arc<ConnectionMonitor>,
    reference: &Arc<OperatorReference>,
) -> anyhow::Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => {
            info!("polling device at {}", config.http.data_url());
            Arc::new(HttpTransport::new(&config.http, Arc::clone(reference))?)
        }
        TransportKind::Mqtt => Arc::new(MqttTransport::connect(
            &config.mqtt,
            config.ingest.backoff_interval(),
            Arc::clone(connection),
            Arc::clone(reference),
        )),
    };
    Ok(transport)
}

/// Push transports pace themselves; only request/response polling sleeps.
fn poll_interval(config: &DashboardConfig) -> Duration {
    match config.transport {
        TransportKind::Http => config.ingest.poll_interval(),
        TransportKind::Mqtt => Duration::ZERO,
    }
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/latest", get(handle_get_latest))
        .route("/api/window", get(handle_get_window))
        .route("/api/status", get(handle_get_status))
        .route("/api/command", post(handle_post_command))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

async fn handle_get_latest(State(state): State<AppState>) -> axum::response::Response {
    match state.store.latest() {
        Some(reading) => Json(reading).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn handle_get_window(
    State(state): State<AppState>,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };
    let n = query.n.unwrap_or_else(|| state.store.capacity());
    Json(state.store.window(n)).into_response()
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let connection = state.connection.get();
    let snapshot = state.store.snapshot();
    let loop_state = *state.loop_state.borrow();

    Json(StatusView {
        transport: state.transport.as_str(),
        connection: connection.as_str(),
        connection_error: connection.error_reason().map(str::to_string),
        loop_state: loop_state.as_str(),
        buffered: snapshot.len,
        capacity: snapshot.capacity,
        reference_temperature: state.reference.get(),
    })
}

async fn handle_post_command(
    State(state): State<AppState>,
    request: Result<Json<CommandRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };
    match state.dispatcher.dispatch(request.kind, request.value).await {
        Ok(ack) => Json(ack).into_response(),
        Err(DispatchError::Validation(err)) => {
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(DispatchError::Transport(err)) => {
            error_response(StatusCode::BAD_GATEWAY, &err.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
