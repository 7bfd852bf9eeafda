use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use leadrelay_db::StorageHealth;
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LivenessResponse {
    pub ok: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/db", get(storage_health))
        .with_state(state)
}

pub async fn health() -> Json<LivenessResponse> {
    Json(LivenessResponse { ok: true })
}

pub async fn storage_health(State(state): State<AppState>) -> (StatusCode, Json<StorageHealth>) {
    let report = state.intake.store().storage_health().await;

    if !report.ok {
        let failing: Vec<&str> = report
            .checks
            .iter()
            .filter(|(_, check)| !check.ok)
            .map(|(name, _)| name.as_str())
            .collect();
        warn!(
            event_name = "system.health.degraded",
            correlation_id = "health",
            failing = ?failing,
            "storage probe failed"
        );
    }

    let status_code = if report.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}
