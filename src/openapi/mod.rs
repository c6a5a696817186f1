use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Orders API",
        version = "0.1.0",
        description = r#"
# Marketplace Orders API

Multi-vendor order lifecycle and Stripe checkout reconciliation.

## Authentication

Every endpoint except the Stripe webhook and health checks expects an access token
issued by the marketplace auth service:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "Invalid transition: Order cannot be cancelled at this stage",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 10, admin listing 20, max 100)
and answer with `pagination { page, limit, total, pages }`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:6003", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order placement, listing and fulfillment"),
        (name = "payments", description = "Stripe checkout and reconciliation"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::list_seller_orders,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::order_stats,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,

        // Payments
        crate::handlers::payments::create_checkout_session,
        crate::handlers::payments::verify_session,
        crate::handlers::payments::payment_history,
        crate::handlers::payment_webhooks::payment_webhook,

        crate::health::health_check,
    ),
    components(
        schemas(
            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderStats,
            crate::handlers::orders::UpdateStatusRequest,
            crate::handlers::orders::CancelOrderRequest,
            crate::models::order::OrderResponse,
            crate::models::order::OrderItemResponse,
            crate::models::order::LineItemInput,
            crate::models::order::ShippingAddress,
            crate::models::order::OrderStatus,
            crate::models::order::PaymentStatus,
            crate::models::order::PaymentMethod,

            // Payment types
            crate::services::payments::CheckoutRequest,
            crate::models::order::PaymentRecord,

            // Envelopes
            crate::handlers::common::OrderEnvelope,
            crate::handlers::common::OrderListResponse,
            crate::handlers::common::CancelOrderResponse,
            crate::handlers::common::OrderStatsResponse,
            crate::handlers::common::CheckoutSessionResponse,
            crate::handlers::common::PaymentHistoryResponse,
            crate::handlers::common::PaginationMeta,
            crate::handlers::common::WebhookAck,
            crate::health::HealthInfo,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_order_and_payment_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Marketplace Orders API"));
        assert!(json.contains("/api/v1/orders/{id}/cancel"));
        assert!(json.contains("/api/v1/payments/webhook"));
        assert!(json.contains("\"Bearer\""));
    }
}
