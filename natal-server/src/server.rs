//! HTTP surface of the chart pipeline.
//!
//! `POST /` and `POST /generate-chart` take a birth submission and answer
//! `{ "success": true, "imageUrl", "sun", "moon", "rising" }`, or
//! `{ "success": false, "error" }` with a 4xx/5xx status.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use natal_core::{BirthSubmission, ChartError, ChartOrchestrator, ChartResult};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct AppState {
    orchestrator: Arc<ChartOrchestrator>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: ChartOrchestrator) -> Self {
        Self { orchestrator: Arc::new(orchestrator), started_at: Utc::now() }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(generate_chart))
        .route("/generate-chart", post(generate_chart))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves until Ctrl-C or SIGTERM, then drains in-flight requests.
pub async fn serve(port: u16, orchestrator: ChartOrchestrator) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "natal listening");

    axum::serve(listener, router(AppState::new(orchestrator)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("natal stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ChartResponse {
    success: bool,
    #[serde(flatten)]
    chart: ChartResult,
}

async fn generate_chart(
    State(state): State<AppState>,
    payload: Result<Json<BirthSubmission>, JsonRejection>,
) -> Result<Json<ChartResponse>, ApiError> {
    let Json(submission) = payload?;

    let chart = state.orchestrator.generate_chart(&submission).await?;
    Ok(Json(ChartResponse { success: true, chart }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "natal",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

/// Error half of every handler: a status plus `{ success: false, error }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ChartError> for ApiError {
    fn from(err: ChartError) -> Self {
        let status = match &err {
            ChartError::Validation(_) => StatusCode::BAD_REQUEST,
            ChartError::LocationNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChartError::Geocode(_)
            | ChartError::Timezone(_)
            | ChartError::Auth(_)
            | ChartError::ChartProvider(_)
            | ChartError::Upload(_) => StatusCode::BAD_GATEWAY,
        };

        Self { status, message: err.to_string() }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: rejection.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "request failed: {}", self.message);
        } else {
            warn!(status = %self.status, "request rejected: {}", self.message);
        }

        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }

    info!("shutdown signal received, draining connections");
}
