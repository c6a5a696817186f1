//! Marketplace order service
//!
//! Order lifecycle, marketplace fee accounting and Stripe checkout
//! reconciliation behind an axum HTTP API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{extract::FromRef, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::auth::JwtVerifier;
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::repositories::order_repository::OrderRepository;
use crate::services::{
    orders::OrderService, payment_provider::PaymentProvider, payments::PaymentService,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub jwt: JwtVerifier,
}

impl AppState {
    /// Wires the order and payment services over one connection pool.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        event_sender: EventSender,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let event_sender = Arc::new(event_sender);
        let orders = Arc::new(OrderService::new(
            OrderRepository::new(db.clone()),
            event_sender.clone(),
            config.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            provider,
            orders.clone(),
            config.clone(),
        ));
        let jwt = JwtVerifier::new(&config.jwt_secret);

        Self {
            db,
            config,
            event_sender,
            orders,
            payments,
            jwt,
        }
    }
}

impl FromRef<AppState> for JwtVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Versioned API, mounted at `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/payments", handlers::payments::payments_routes())
}

/// Full application router with the shared middleware stack; CORS is left to the binary.
pub fn app_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .nest("/api/v1", api_v1_routes())
        .merge(health::health_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "marketplace-orders",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.config.environment,
    })))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn response_outside_a_request_has_no_request_id() {
        let response = ApiResponse::success(1u8);
        let meta = response.meta.expect("metadata expected");
        assert!(meta.request_id.is_none());
    }
}
