/*!
 * # Health Check Module
 *
 * - Basic health check (`/health`) - pings the order store
 * - Liveness check (`/health/live`) - the process answers requests
 * - Readiness check (`/health/ready`) - the order store accepts queries
 */

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::error;
use utoipa::ToSchema;

use crate::{db::check_connection, AppState};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthDetail {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub details: BTreeMap<String, HealthDetail>,
}

impl HealthInfo {
    fn status_code(&self) -> StatusCode {
        match self.status {
            HealthStatus::Up => StatusCode::OK,
            HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

async fn probe(state: &AppState) -> HealthInfo {
    let database = match check_connection(&state.db).await {
        Ok(()) => HealthDetail {
            status: HealthStatus::Up,
            message: None,
        },
        Err(e) => {
            error!("Database health check failed: {}", e);
            HealthDetail {
                status: HealthStatus::Down,
                message: Some("database unreachable".to_string()),
            }
        }
    };

    let status = database.status;
    let mut details = BTreeMap::new();
    details.insert("database".to_string(), database);

    HealthInfo {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        details,
    }
}

/// Basic health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are up", body = HealthInfo),
        (status = 503, description = "Database unreachable", body = HealthInfo)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let info = probe(&state).await;
    (info.status_code(), Json(info))
}

pub async fn liveness_check() -> impl IntoResponse {
    Json(json!({ "status": HealthStatus::Up, "timestamp": Utc::now() }))
}

pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let info = probe(&state).await;
    let code = info.status_code();
    (code, Json(json!({ "status": info.status, "ready": code == StatusCode::OK })))
}

/// Health routes, mounted at the root
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
}
