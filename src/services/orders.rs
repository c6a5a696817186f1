use crate::{
    auth::{require_role, AuthUser, Role},
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    models::order::{
        parse_status, LineItemInput, OrderResponse, OrderStatus, PaymentMethod, PaymentStatus,
        ShippingAddress,
    },
    repositories::order_repository::{
        NewOrder, NewOrderItem, OrderFilter, OrderRepository, StoreError, StoredOrder,
    },
    services::{
        fees::{calculate_fee, round_money, MAX_MONEY},
        order_number::{generate_order_number, looks_like_order_number},
        order_status::{plan_transition, StatusSnapshot},
    },
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Fresh order numbers tried before giving up on a collision.
const ORDER_NUMBER_ATTEMPTS: u32 = 3;
/// Largest accepted gap between a client-supplied figure and the recomputed one.
const MONEY_TOLERANCE: Decimal = dec!(0.01);
const ESTIMATED_DELIVERY_DAYS: i64 = 7;
const ADMIN_DEFAULT_PAGE_SIZE: u64 = 20;
const DEFAULT_CANCEL_REASON: &str = "Cancelled by customer";

/// Body of `POST /orders`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    /// Checked against the recomputed subtotal when present
    #[schema(value_type = Option<String>)]
    pub subtotal: Option<Decimal>,
    #[serde(default)]
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[serde(default)]
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[serde(default)]
    #[schema(value_type = String)]
    pub tax: Decimal,
    /// Checked against the recomputed total when present
    #[schema(value_type = Option<String>)]
    pub total: Option<Decimal>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: String,
}

/// Everything needed to assemble an order, whichever path it arrives by.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub user_id: String,
    pub items: Vec<LineItemInput>,
    pub shipping_address: ShippingAddress,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub coupon_code: String,
    pub payment_method: PaymentMethod,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
}

/// Query string shared by the listing endpoints
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    /// Fulfillment status filter
    pub status: Option<String>,
    /// Payment status filter (admin listing only)
    pub payment_status: Option<String>,
    /// Shop filter (seller listing only)
    pub shop_id: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: u64,
    #[schema(value_type = String)]
    pub total_revenue: Decimal,
    pub by_status: BTreeMap<String, u64>,
}

/// Result of confirming a paid checkout session.
#[derive(Debug, Clone)]
pub struct Materialized {
    pub order: OrderResponse,
    /// False when an earlier trigger already wrote the order
    pub created: bool,
}

fn to_response(stored: StoredOrder) -> Result<OrderResponse, ServiceError> {
    OrderResponse::from_models(stored.order, stored.items)
}

fn parse_filter<T: std::str::FromStr>(
    field: &str,
    value: Option<&str>,
) -> Result<Option<T>, ServiceError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => parse_status(field, v).map(Some),
        None => Ok(None),
    }
}

fn invalid(errors: validator::ValidationErrors) -> ServiceError {
    ServiceError::InvalidInput(errors.to_string())
}

/// Rejects amounts the money columns cannot store; `None` is an overflow.
fn within_money_range(field: &str, value: Option<Decimal>) -> Result<Decimal, ServiceError> {
    match value {
        Some(v) if v <= MAX_MONEY => Ok(v),
        _ => Err(ServiceError::InvalidInput(format!(
            "{} exceeds the maximum amount of {}",
            field, MAX_MONEY
        ))),
    }
}

/// First page is 1; the row offset must stay within `i64`.
fn page_number(page: Option<u64>, limit: u64) -> Result<u64, ServiceError> {
    let page = page.unwrap_or(1).max(1);
    match page.checked_mul(limit) {
        Some(end) if end <= i64::MAX as u64 => Ok(page),
        _ => Err(ServiceError::InvalidInput(format!(
            "page {} is out of range",
            page
        ))),
    }
}

/// Service for managing orders
#[derive(Clone)]
pub struct OrderService {
    repo: OrderRepository,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        repo: OrderRepository,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            repo,
            event_sender,
            config,
        }
    }

    /// Validates the draft and computes every derived field.
    pub(crate) fn assemble(&self, draft: OrderDraft, now: DateTime<Utc>) -> Result<NewOrder, ServiceError> {
        if draft.items.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Order must contain at least one item".to_string(),
            ));
        }
        draft.shipping_address.validate().map_err(invalid)?;
        for item in &draft.items {
            item.validate().map_err(invalid)?;
        }
        for (field, value) in [
            ("shippingCost", draft.shipping_cost),
            ("discount", draft.discount),
            ("tax", draft.tax),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(ServiceError::InvalidInput(format!(
                    "{} must not be negative",
                    field
                )));
            }
            within_money_range(field, Some(value))?;
        }

        let percent = self.config.platform_fee_percent;
        let mut subtotal = Decimal::ZERO;
        let mut items = Vec::with_capacity(draft.items.len());
        for line in draft.items {
            let price = within_money_range("price", Some(line.unit_price()))?;
            let line_total = within_money_range("line total", line.line_total())?;
            let split = calculate_fee(line_total, percent)?;
            subtotal = within_money_range("subtotal", subtotal.checked_add(line_total))?;
            items.push(NewOrderItem {
                product_id: line.product_id,
                shop_id: line.shop_id,
                title: line.title,
                image: line.image,
                price,
                quantity: line.quantity,
                selected_color: line.selected_color,
                selected_size: line.selected_size,
                platform_fee: split.platform_fee,
                seller_earnings: split.seller_earnings,
            });
        }

        let subtotal = round_money(subtotal);
        let shipping_cost = round_money(draft.shipping_cost);
        let discount = round_money(draft.discount);
        let tax = round_money(draft.tax);
        let total = subtotal
            .checked_add(shipping_cost)
            .and_then(|v| v.checked_add(tax))
            .and_then(|v| v.checked_sub(discount));
        let total = within_money_range("total", total)?;
        if total.is_sign_negative() && !total.is_zero() {
            return Err(ServiceError::InvalidInput(
                "Discount exceeds order amount".to_string(),
            ));
        }

        Ok(NewOrder {
            id: Uuid::new_v4(),
            order_number: generate_order_number(),
            user_id: draft.user_id,
            shipping_address: serde_json::to_string(&draft.shipping_address)?,
            subtotal,
            shipping_cost,
            discount,
            tax,
            total,
            payment_method: draft.payment_method,
            payment_status: draft.payment_method.initial_payment_status(),
            stripe_session_id: draft.stripe_session_id,
            stripe_payment_intent_id: draft.stripe_payment_intent_id,
            coupon_code: draft.coupon_code.trim().to_string(),
            estimated_delivery: now + Duration::days(ESTIMATED_DELIVERY_DAYS),
            created_at: now,
            items,
        })
    }

    /// Inserts, drawing a fresh order number when the generated one collides.
    async fn persist(&self, mut new_order: NewOrder) -> Result<StoredOrder, StoreError> {
        let mut attempt = 1;
        loop {
            match self.repo.insert(new_order.clone()).await {
                Err(StoreError::DuplicateOrderNumber) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    warn!(
                        order_number = %new_order.order_number,
                        attempt,
                        "Order number collision, regenerating"
                    );
                    new_order.order_number = generate_order_number();
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn announce_created(&self, stored: &StoredOrder) {
        let method: &'static str = match parse_status::<PaymentMethod>(
            "payment method",
            &stored.order.payment_method,
        ) {
            Ok(method) => method.into(),
            Err(_) => "unknown",
        };
        counter!("orders.created", 1, "payment_method" => method);
        self.event_sender.notify(Event::OrderCreated {
            order_id: stored.order.id,
            order_number: stored.order.order_number.clone(),
            user_id: stored.order.user_id.clone(),
            payment_method: stored.order.payment_method.clone(),
        });
    }

    /// Creates an order from a storefront request.
    #[instrument(skip(self, principal, request), fields(user_id = %principal.id, payment_method = %request.payment_method))]
    pub async fn create_order(
        &self,
        principal: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let supplied_subtotal = request.subtotal;
        let supplied_total = request.total;

        let new_order = self.assemble(
            OrderDraft {
                user_id: principal.id.clone(),
                items: request.items,
                shipping_address: request.shipping_address,
                shipping_cost: request.shipping_cost,
                discount: request.discount,
                tax: request.tax,
                coupon_code: request.coupon_code,
                payment_method: request.payment_method,
                stripe_session_id: None,
                stripe_payment_intent_id: None,
            },
            Utc::now(),
        )?;

        for (field, supplied, computed) in [
            ("subtotal", supplied_subtotal, new_order.subtotal),
            ("total", supplied_total, new_order.total),
        ] {
            if let Some(supplied) = supplied {
                let off = supplied
                    .checked_sub(computed)
                    .map_or(true, |diff| diff.abs() > MONEY_TOLERANCE);
                if off {
                    warn!(%supplied, %computed, field, "Client-supplied amount rejected");
                    return Err(ServiceError::InvalidInput(format!(
                        "{} {} does not match computed {}",
                        field, supplied, computed
                    )));
                }
            }
        }

        let stored = self.persist(new_order).await.map_err(|e| {
            error!(error = %e, "Failed to persist order");
            ServiceError::from(e)
        })?;

        info!(
            order_id = %stored.order.id,
            order_number = %stored.order.order_number,
            total = %stored.order.total,
            "Order created successfully"
        );
        self.announce_created(&stored);
        to_response(stored)
    }

    /// Writes the order for a paid checkout session exactly once.
    ///
    /// A session that already has an order, or loses the insert race on the
    /// session index, resolves to the existing order.
    #[instrument(skip(self, draft), fields(session_id = ?draft.stripe_session_id))]
    pub async fn materialize_paid_session(
        &self,
        draft: OrderDraft,
    ) -> Result<Materialized, ServiceError> {
        let session_id = draft.stripe_session_id.clone().ok_or_else(|| {
            ServiceError::InternalError("paid session materialized without a session id".into())
        })?;

        if let Some(existing) = self.repo.find_by_session(&session_id).await? {
            return self.replayed(&session_id, existing);
        }

        let new_order = self.assemble(draft, Utc::now())?;
        match self.persist(new_order).await {
            Ok(stored) => {
                info!(
                    order_id = %stored.order.id,
                    order_number = %stored.order.order_number,
                    "Order materialized from checkout session"
                );
                self.announce_created(&stored);
                Ok(Materialized {
                    order: to_response(stored)?,
                    created: true,
                })
            }
            Err(StoreError::DuplicateSession) => {
                let existing = self.repo.find_by_session(&session_id).await?.ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "session {} reported as duplicate but not found",
                        session_id
                    ))
                })?;
                self.replayed(&session_id, existing)
            }
            Err(e) => {
                error!(error = %e, "Failed to materialize order");
                Err(e.into())
            }
        }
    }

    fn replayed(
        &self,
        session_id: &str,
        existing: StoredOrder,
    ) -> Result<Materialized, ServiceError> {
        info!(order_id = %existing.order.id, "Checkout session already materialized");
        counter!("orders.duplicate_materializations", 1);
        self.event_sender.notify(Event::CheckoutSessionReplayed {
            session_id: session_id.to_string(),
            order_id: existing.order.id,
        });
        Ok(Materialized {
            order: to_response(existing)?,
            created: false,
        })
    }

    /// Resolves an internal id or an `NM-…` reference.
    async fn load(&self, reference: &str) -> Result<StoredOrder, ServiceError> {
        let found = if let Ok(id) = Uuid::parse_str(reference) {
            self.repo.find_by_id(id).await?
        } else if looks_like_order_number(reference) {
            self.repo.find_by_order_number(reference).await?
        } else {
            None
        };
        found.ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn get_order(
        &self,
        principal: &AuthUser,
        reference: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let stored = self.load(reference).await?;
        if stored.order.user_id != principal.id && !principal.is_admin() {
            warn!(order_id = %stored.order.id, "Order read denied");
            return Err(ServiceError::Forbidden(
                "Not authorized to view this order".to_string(),
            ));
        }
        to_response(stored)
    }

    async fn page(
        &self,
        filter: OrderFilter,
        query: &OrderListQuery,
        default_limit: u64,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        let limit = self.config.clamp_page_size(query.limit, default_limit);
        let page = page_number(query.page, limit)?;
        let (stored, total) = self.repo.list(&filter, page, limit).await?;
        let items = stored
            .into_iter()
            .map(to_response)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            page,
            limit,
            total,
        })
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn list_my_orders(
        &self,
        principal: &AuthUser,
        query: &OrderListQuery,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        let filter = OrderFilter {
            user_id: Some(principal.id.clone()),
            status: parse_filter("status", query.status.as_deref())?,
            ..Default::default()
        };
        self.page(filter, query, self.config.api_default_page_size)
            .await
    }

    /// Orders with at least one line item from the shop.
    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn list_seller_orders(
        &self,
        principal: &AuthUser,
        query: &OrderListQuery,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        require_role(principal, &[Role::Seller, Role::Admin])?;

        let shop_id = query
            .shop_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&principal.id)
            .to_string();
        if shop_id != principal.id && !principal.is_admin() {
            return Err(ServiceError::Forbidden(
                "Sellers may only list orders for their own shop".to_string(),
            ));
        }

        let filter = OrderFilter {
            shop_id: Some(shop_id),
            status: parse_filter("status", query.status.as_deref())?,
            ..Default::default()
        };
        self.page(filter, query, self.config.api_default_page_size)
            .await
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn list_all_orders(
        &self,
        principal: &AuthUser,
        query: &OrderListQuery,
    ) -> Result<Page<OrderResponse>, ServiceError> {
        require_role(principal, &[Role::Admin])?;
        let filter = OrderFilter {
            status: parse_filter("status", query.status.as_deref())?,
            payment_status: parse_filter::<PaymentStatus>(
                "payment status",
                query.payment_status.as_deref(),
            )?,
            ..Default::default()
        };
        self.page(filter, query, ADMIN_DEFAULT_PAGE_SIZE).await
    }

    /// The principal's online-payment orders, newest first.
    pub async fn list_online_orders(
        &self,
        principal: &AuthUser,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Page<StoredOrder>, ServiceError> {
        let limit = self
            .config
            .clamp_page_size(limit, self.config.api_default_page_size);
        let page = page_number(page, limit)?;
        let filter = OrderFilter {
            user_id: Some(principal.id.clone()),
            payment_method: Some(PaymentMethod::Stripe),
            ..Default::default()
        };
        let (items, total) = self.repo.list(&filter, page, limit).await?;
        Ok(Page {
            items,
            page,
            limit,
            total,
        })
    }

    /// Advances an order through fulfillment on behalf of a seller or admin.
    #[instrument(skip(self, principal, reason), fields(user_id = %principal.id, new_status = %status))]
    pub async fn update_status(
        &self,
        principal: &AuthUser,
        reference: &str,
        status: &str,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        require_role(principal, &[Role::Seller, Role::Admin])?;

        let stored = self.load(reference).await?;
        if !principal.is_admin() && !stored.items.iter().any(|i| i.shop_id == principal.id) {
            warn!(order_id = %stored.order.id, "Seller has no items in order");
            return Err(ServiceError::Forbidden(
                "Not authorized to update this order".to_string(),
            ));
        }

        let target: OrderStatus = status.trim().parse().map_err(|_| {
            ServiceError::InvalidTransition(format!(
                "Cannot transition from \"{}\" to \"{}\"",
                stored.order.status, status
            ))
        })?;

        self.transition(stored, target, reason).await
    }

    /// Buyer-initiated cancellation.
    #[instrument(skip(self, principal, reason), fields(user_id = %principal.id))]
    pub async fn cancel_order(
        &self,
        principal: &AuthUser,
        reference: &str,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let stored = self.load(reference).await?;
        if stored.order.user_id != principal.id {
            return Err(ServiceError::Forbidden(
                "Not authorized to cancel this order".to_string(),
            ));
        }

        let current: OrderStatus = parse_status("status", &stored.order.status)?;
        if !current.is_cancellable() {
            return Err(ServiceError::InvalidTransition(
                "Order cannot be cancelled at this stage".to_string(),
            ));
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        self.transition(stored, OrderStatus::Cancelled, Some(reason))
            .await
    }

    async fn transition(
        &self,
        stored: StoredOrder,
        target: OrderStatus,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let order = &stored.order;
        let snapshot = StatusSnapshot {
            status: parse_status("status", &order.status)?,
            payment_status: parse_status("payment status", &order.payment_status)?,
            payment_method: parse_status("payment method", &order.payment_method)?,
        };

        let now = Utc::now();
        let change = plan_transition(snapshot, target, reason, now)?;
        let updated = self
            .repo
            .apply_status_change(order.id, order.version, &change, now)
            .await?;

        info!(
            order_id = %order.id,
            old_status = %snapshot.status,
            new_status = %change.status,
            payment_status = %change.payment_status,
            "Order status updated successfully"
        );

        let event = match change.status {
            OrderStatus::Cancelled => Event::OrderCancelled {
                order_id: order.id,
                reason: change.cancel_reason.clone().unwrap_or_default(),
            },
            _ => Event::OrderStatusChanged {
                order_id: order.id,
                old_status: snapshot.status.to_string(),
                new_status: change.status.to_string(),
            },
        };
        self.event_sender.notify(event);

        to_response(updated)
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn order_stats(&self, principal: &AuthUser) -> Result<OrderStats, ServiceError> {
        require_role(principal, &[Role::Admin])?;
        let totals = self.repo.totals().await?;
        Ok(OrderStats {
            total_orders: totals.total_orders,
            total_revenue: round_money(totals.total_revenue),
            by_status: totals.by_status,
        })
    }
}
