use axum::{body::Bytes, extract::State, http::HeaderMap, response::Json};
use tracing::{info, warn};

use super::common::WebhookAck;
use crate::{
    errors::ServiceError,
    services::{payment_provider::SIGNATURE_HEADER, payments::WebhookOutcome},
    AppState,
};

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body(content = String, description = "Raw Stripe event payload"),
    params(("stripe-signature" = String, Header, description = "Stripe signature header")),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order store unavailable; provider will redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match state.payments.handle_webhook(&body, signature).await? {
        WebhookOutcome::Materialized { order_id, created } => {
            info!(%order_id, created, "Checkout webhook reconciled");
        }
        WebhookOutcome::Ignored(reason) => {
            info!("Webhook ignored: {}", reason);
        }
        WebhookOutcome::Unprocessable(reason) => {
            warn!("Webhook acknowledged without an order: {}", reason);
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
