use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{
    CancelOrderResponse, OrderEnvelope, OrderListResponse, OrderStatsResponse,
};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{CreateOrderRequest, OrderListQuery},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Order routes, mounted under `/orders`
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/my-orders", get(list_my_orders))
        .route("/seller-orders", get(list_seller_orders))
        .route("/all", get(list_all_orders))
        .route("/stats", get(order_stats))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/cancel", put(cancel_order))
}

/// Create an order (cash on delivery or already settled)
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderEnvelope),
        (status = 400, description = "Invalid cart, address or totals", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderEnvelope>), ServiceError> {
    let order = state.orders.create_order(&user, request).await?;
    Ok((StatusCode::CREATED, Json(OrderEnvelope::new(order))))
}

/// Orders placed by the caller
#[utoipa::path(
    get,
    path = "/api/v1/orders/my-orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Caller's orders", body = OrderListResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let page = state.orders.list_my_orders(&user, &query).await?;
    Ok(Json(page.into()))
}

/// Orders containing items from a shop
#[utoipa::path(
    get,
    path = "/api/v1/orders/seller-orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders containing the shop's items", body = OrderListResponse),
        (status = 403, description = "Caller is not the shop's seller", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_seller_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let page = state.orders.list_seller_orders(&user, &query).await?;
    Ok(Json(page.into()))
}

/// Every order in the marketplace
#[utoipa::path(
    get,
    path = "/api/v1/orders/all",
    params(OrderListQuery),
    responses(
        (status = 200, description = "All orders", body = OrderListResponse),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let page = state.orders.list_all_orders(&user, &query).await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/stats",
    responses(
        (status = 200, description = "Order counts and revenue", body = OrderStatsResponse),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn order_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<OrderStatsResponse>, ServiceError> {
    let stats = state.orders.order_stats(&user).await?;
    Ok(Json(OrderStatsResponse {
        success: true,
        stats,
    }))
}

/// Fetch one order by id or order number
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order UUID or order number")),
    responses(
        (status = 200, description = "Order", body = OrderEnvelope),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OrderEnvelope>, ServiceError> {
    let order = state.orders.get_order(&user, &id).await?;
    Ok(Json(OrderEnvelope::new(order)))
}

/// Advance an order's fulfillment status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = String, Path, description = "Order UUID or order number")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = OrderEnvelope),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller does not sell in this order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<OrderEnvelope>, ServiceError> {
    let order = state
        .orders
        .update_status(&user, &id, &request.status, request.reason)
        .await?;
    Ok(Json(OrderEnvelope::new(order)))
}

/// Cancel an order the caller placed
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = String, Path, description = "Order UUID or order number")),
    request_body(content = CancelOrderRequest, description = "Optional cancellation reason"),
    responses(
        (status = 200, description = "Order cancelled", body = CancelOrderResponse),
        (status = 400, description = "Order already past confirmation", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    request: Option<Json<CancelOrderRequest>>,
) -> Result<Json<CancelOrderResponse>, ServiceError> {
    let reason = request.and_then(|Json(body)| body.reason);
    let order = state.orders.cancel_order(&user, &id, reason).await?;
    Ok(Json(CancelOrderResponse {
        success: true,
        message: "Order cancelled successfully".to_string(),
        order,
    }))
}
