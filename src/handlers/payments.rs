use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};

use super::common::{
    CheckoutSessionResponse, OrderEnvelope, PaginationParams, PaymentHistoryResponse,
};
use super::payment_webhooks::payment_webhook;
use crate::{auth::AuthUser, errors::ServiceError, services::payments::CheckoutRequest, AppState};

/// Payment routes, mounted under `/payments`
pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/webhook", post(payment_webhook))
        .route("/verify/:session_id", get(verify_session))
        .route("/history", get(payment_history))
}

/// Start a hosted checkout for the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-checkout-session",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutSessionResponse),
        (status = 400, description = "Empty cart or invalid address", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSessionResponse>, ServiceError> {
    let session = state.payments.create_checkout_session(&user, request).await?;
    Ok(Json(CheckoutSessionResponse {
        success: true,
        url: session.url,
        session_id: session.session_id,
    }))
}

/// Confirm a checkout after the storefront redirect
#[utoipa::path(
    get,
    path = "/api/v1/payments/verify/{session_id}",
    params(("session_id" = String, Path, description = "Checkout session id")),
    responses(
        (status = 200, description = "Order for the paid session", body = OrderEnvelope),
        (status = 400, description = "Payment not completed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Session belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn verify_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<OrderEnvelope>, ServiceError> {
    let order = state.payments.verify_session(&user, &session_id).await?;
    Ok(Json(OrderEnvelope::new(order)))
}

/// Online payments made by the caller
#[utoipa::path(
    get,
    path = "/api/v1/payments/history",
    params(PaginationParams),
    responses(
        (status = 200, description = "Payment history", body = PaymentHistoryResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaymentHistoryResponse>, ServiceError> {
    let page = state
        .payments
        .payment_history(&user, params.page, params.limit)
        .await?;
    Ok(Json(page.into()))
}
