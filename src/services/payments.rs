//! Payment reconciliation between hosted checkout and the order store.
//!
//! A paid checkout session reaches us twice: once through the provider's
//! webhook and once when the buyer's browser lands on the success page and
//! asks us to verify the session. Both paths rebuild the same [`OrderDraft`]
//! from the session metadata and hand it to
//! [`OrderService::materialize_paid_session`], which writes at most one order
//! per session.

use crate::{
    auth::AuthUser,
    config::AppConfig,
    errors::ServiceError,
    models::order::{LineItemInput, OrderResponse, PaymentMethod, PaymentRecord, ShippingAddress},
    services::{
        fees::round_money,
        orders::{Materialized, OrderDraft, OrderService, Page},
        payment_provider::{
            is_checkout_session_id, CheckoutDiscount, CheckoutLineItem, CheckoutSessionRequest,
            PaymentProvider, ProviderSession, CHECKOUT_SESSION_COMPLETED,
        },
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fired for delayed payment methods once the funds arrive.
pub const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

mod metadata_keys {
    pub const USER_ID: &str = "userId";
    pub const ITEMS: &str = "items";
    pub const SHIPPING_ADDRESS: &str = "shippingAddress";
    pub const COUPON_CODE: &str = "couponCode";
    pub const DISCOUNT: &str = "discount";
    pub const TAX: &str = "tax";
    pub const SHIPPING_COST: &str = "shippingCost";
}

/// Body of `POST /payments/create-checkout-session`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub coupon_code: String,
    #[serde(default)]
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[serde(default)]
    #[schema(value_type = String)]
    pub tax: Decimal,
    #[serde(default)]
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

/// What a verified webhook delivery led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Materialized { order_id: Uuid, created: bool },
    /// Event type we do not act on, or a session that is not paid yet
    Ignored(String),
    /// Signed by the provider but not reconstructible; redelivery cannot help
    Unprocessable(String),
}

/// Converts a money amount to the provider's integer minor units.
pub fn to_cents(amount: Decimal) -> Result<i64, ServiceError> {
    round_money(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| ServiceError::InvalidInput(format!("Amount out of range: {}", amount)))
}

fn meta<'a>(session: &'a ProviderSession, key: &str) -> &'a str {
    session
        .metadata
        .get(key)
        .map(|v| v.trim())
        .unwrap_or_default()
}

fn parse_amount(session: &ProviderSession, key: &str) -> Result<Decimal, String> {
    match meta(session, key) {
        "" => Ok(Decimal::ZERO),
        raw => Decimal::from_str(raw).map_err(|e| format!("{}: {}", key, e)),
    }
}

/// Rebuilds the order draft embedded in a checkout session's metadata.
pub fn draft_from_session(session: &ProviderSession) -> Result<OrderDraft, String> {
    let user_id = meta(session, metadata_keys::USER_ID);
    if user_id.is_empty() {
        return Err("missing userId".to_string());
    }
    let items: Vec<LineItemInput> = serde_json::from_str(meta(session, metadata_keys::ITEMS))
        .map_err(|e| format!("items: {}", e))?;
    let shipping_address: ShippingAddress =
        serde_json::from_str(meta(session, metadata_keys::SHIPPING_ADDRESS))
            .map_err(|e| format!("shippingAddress: {}", e))?;

    Ok(OrderDraft {
        user_id: user_id.to_string(),
        items,
        shipping_address,
        shipping_cost: parse_amount(session, metadata_keys::SHIPPING_COST)?,
        discount: parse_amount(session, metadata_keys::DISCOUNT)?,
        tax: parse_amount(session, metadata_keys::TAX)?,
        coupon_code: meta(session, metadata_keys::COUPON_CODE).to_string(),
        payment_method: PaymentMethod::Stripe,
        stripe_session_id: Some(session.id.clone()),
        stripe_payment_intent_id: session.payment_intent.clone(),
    })
}

#[derive(Clone)]
pub struct PaymentService {
    provider: Arc<dyn PaymentProvider>,
    orders: Arc<OrderService>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        orders: Arc<OrderService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            provider,
            orders,
            config,
        }
    }

    /// Opens a hosted checkout session carrying everything needed to rebuild the order.
    #[instrument(skip(self, principal, request), fields(user_id = %principal.id, items = request.items.len()))]
    pub async fn create_checkout_session(
        &self,
        principal: &AuthUser,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::InvalidInput("Cart is empty".to_string()));
        }

        // Priced exactly as the order will be once the session is paid
        let priced = self.orders.assemble(
            OrderDraft {
                user_id: principal.id.clone(),
                items: request.items.clone(),
                shipping_address: request.shipping_address.clone(),
                shipping_cost: request.shipping_cost,
                discount: request.discount,
                tax: request.tax,
                coupon_code: request.coupon_code.clone(),
                payment_method: PaymentMethod::Stripe,
                stripe_session_id: None,
                stripe_payment_intent_id: None,
            },
            Utc::now(),
        )?;

        let mut line_items = priced
            .items
            .iter()
            .map(|item| {
                Ok(CheckoutLineItem {
                    name: item.title.clone(),
                    image: Some(item.image.clone()).filter(|s| !s.is_empty()),
                    unit_amount: to_cents(item.price)?,
                    quantity: i64::from(item.quantity),
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        for (name, amount) in [("Shipping", priced.shipping_cost), ("Tax", priced.tax)] {
            if amount > Decimal::ZERO {
                line_items.push(CheckoutLineItem {
                    name: name.to_string(),
                    image: None,
                    unit_amount: to_cents(amount)?,
                    quantity: 1,
                });
            }
        }
        let discount = if priced.discount > Decimal::ZERO {
            let name = match priced.coupon_code.as_str() {
                "" => "Discount".to_string(),
                code => code.to_string(),
            };
            Some(CheckoutDiscount {
                name,
                amount_off: to_cents(priced.discount)?,
            })
        } else {
            None
        };

        let metadata = BTreeMap::from([
            (metadata_keys::USER_ID.to_string(), principal.id.clone()),
            (
                metadata_keys::ITEMS.to_string(),
                serde_json::to_string(&request.items)?,
            ),
            (
                metadata_keys::SHIPPING_ADDRESS.to_string(),
                serde_json::to_string(&request.shipping_address)?,
            ),
            (
                metadata_keys::COUPON_CODE.to_string(),
                request.coupon_code.trim().to_string(),
            ),
            (metadata_keys::DISCOUNT.to_string(), request.discount.to_string()),
            (metadata_keys::TAX.to_string(), request.tax.to_string()),
            (
                metadata_keys::SHIPPING_COST.to_string(),
                request.shipping_cost.to_string(),
            ),
        ]);

        let frontend = self.config.frontend_url.trim_end_matches('/');
        let session = self
            .provider
            .create_session(CheckoutSessionRequest {
                line_items,
                currency: self.config.currency.clone(),
                success_url: format!(
                    "{}/order/success?session_id={{CHECKOUT_SESSION_ID}}",
                    frontend
                ),
                cancel_url: format!("{}/cart", frontend),
                customer_email: principal.email.clone(),
                discount,
                metadata,
            })
            .await?;

        let url = session.url.ok_or_else(|| {
            ServiceError::ExternalServiceError("Checkout session has no redirect URL".to_string())
        })?;
        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutResponse {
            url,
            session_id: session.id,
        })
    }

    /// Authenticates and applies one webhook delivery.
    ///
    /// Signature failures are returned before anything else is touched.
    /// Redeliveries resolve to the existing order; only store failures are
    /// surfaced so the provider retries.
    #[instrument(skip_all)]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let event = self.provider.construct_event(payload, signature).map_err(|e| {
            warn!(error = %e, "Webhook signature verification failed");
            counter!("payments.webhook_deliveries", 1, "outcome" => "rejected");
            e
        })?;

        let outcome = match event.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED | ASYNC_PAYMENT_SUCCEEDED => {
                match event.checkout_session() {
                    Ok(session) if session.is_paid() => self.materialize(&session).await?,
                    Ok(session) => WebhookOutcome::Ignored(format!(
                        "session {} not paid ({})",
                        session.id, session.payment_status
                    )),
                    Err(e) => WebhookOutcome::Unprocessable(format!("session object: {}", e)),
                }
            }
            other => WebhookOutcome::Ignored(other.to_string()),
        };

        let label = match &outcome {
            WebhookOutcome::Materialized { created: true, .. } => "created",
            WebhookOutcome::Materialized { created: false, .. } => "duplicate",
            WebhookOutcome::Ignored(_) => "ignored",
            WebhookOutcome::Unprocessable(_) => "unprocessable",
        };
        counter!("payments.webhook_deliveries", 1, "outcome" => label);
        match &outcome {
            WebhookOutcome::Unprocessable(reason) => {
                error!(event_id = %event.id, %reason, "Webhook acknowledged without an order")
            }
            _ => info!(event_id = %event.id, event_type = %event.event_type, outcome = label, "Webhook processed"),
        }
        Ok(outcome)
    }

    async fn materialize(&self, session: &ProviderSession) -> Result<WebhookOutcome, ServiceError> {
        let draft = match draft_from_session(session) {
            Ok(draft) => draft,
            Err(reason) => return Ok(WebhookOutcome::Unprocessable(reason)),
        };
        match self.orders.materialize_paid_session(draft).await {
            Ok(Materialized { order, created }) => Ok(WebhookOutcome::Materialized {
                order_id: order.id,
                created,
            }),
            // Validation failures will fail identically on every redelivery
            Err(ServiceError::InvalidInput(reason)) | Err(ServiceError::ValidationError(reason)) => {
                Ok(WebhookOutcome::Unprocessable(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Confirms a session after the buyer returns from checkout.
    ///
    /// If the webhook has not landed yet the order is materialized here,
    /// through the same idempotent path.
    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn verify_session(
        &self,
        principal: &AuthUser,
        session_id: &str,
    ) -> Result<OrderResponse, ServiceError> {
        if !is_checkout_session_id(session_id) {
            warn!(session_id, "Malformed checkout session id");
            return Err(ServiceError::NotFound("Checkout session not found".to_string()));
        }
        let session = self.provider.retrieve_session(session_id).await?;
        if !session.is_paid() {
            return Err(ServiceError::PaymentIncomplete(
                "Payment not completed".to_string(),
            ));
        }

        if meta(&session, metadata_keys::USER_ID) != principal.id && !principal.is_admin() {
            warn!(session_id, "Session verification by non-owner denied");
            return Err(ServiceError::Forbidden(
                "Not authorized to verify this session".to_string(),
            ));
        }

        let draft = draft_from_session(&session).map_err(|reason| {
            error!(session_id, %reason, "Checkout session metadata is unusable");
            ServiceError::InvalidInput(format!("Checkout session metadata is invalid: {}", reason))
        })?;
        let materialized = self.orders.materialize_paid_session(draft).await?;
        if materialized.created {
            info!(order_id = %materialized.order.id, "Order materialized by session verification");
        }
        Ok(materialized.order)
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.id))]
    pub async fn payment_history(
        &self,
        principal: &AuthUser,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Page<PaymentRecord>, ServiceError> {
        let found = self.orders.list_online_orders(principal, page, limit).await?;
        let items = found
            .items
            .into_iter()
            .map(|stored| PaymentRecord::try_from(stored.order))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            page: found.page,
            limit: found.limit,
            total: found.total,
        })
    }
}
