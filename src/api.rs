// src/api.rs
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::metrics::Metrics;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::status::{Health, StatusData};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// `/health`, `/status` and `/metrics`.
pub fn router(state: AppState, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .with_state(state)
        .merge(metrics.router())
        .layer(CorsLayer::very_permissive())
}

#[derive(Serialize)]
struct StatusOut {
    now: DateTime<Utc>,
    scheduler: SchedulerState,
    health: Health,
    #[serde(flatten)]
    status: StatusData,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    let now = Utc::now();
    let monitor = state.scheduler.status();
    Json(StatusOut {
        now,
        scheduler: state.scheduler.state(),
        health: monitor.health(now),
        status: monitor.snapshot(),
    })
}
