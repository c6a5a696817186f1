use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::services::fees::round_money;

/// Position of an order in the shipping lifecycle.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Packed,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    Returned,
}

/// Money state of an order, independent of fulfillment.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    /// Online card payment through the checkout provider
    Stripe,
    /// Cash on delivery
    Cod,
}

impl PaymentMethod {
    /// Online orders only exist once the provider has confirmed payment.
    pub fn initial_payment_status(self) -> PaymentStatus {
        match self {
            PaymentMethod::Stripe => PaymentStatus::Paid,
            PaymentMethod::Cod => PaymentStatus::Pending,
        }
    }
}

/// Parses a status column or query value, mapping unknown strings to `InvalidInput`.
pub fn parse_status<T>(field: &str, value: &str) -> Result<T, ServiceError>
where
    T: std::str::FromStr,
{
    value
        .parse::<T>()
        .map_err(|_| ServiceError::InvalidInput(format!("Unknown {}: {}", field, value)))
}

/// Presents a stored amount with exactly two decimal places.
fn cents(mut value: Decimal) -> Decimal {
    value.rescale(2);
    value
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("negative");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Delivery address; every field is required.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub full_name: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub phone: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub street: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub city: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub state: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub zip_code: String,
    #[serde(default)]
    #[validate(custom = "not_blank")]
    pub country: String,
}

/// A cart line as sent by the storefront.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    #[validate(custom = "not_blank")]
    pub product_id: String,
    #[validate(custom = "not_blank")]
    pub shop_id: String,
    #[validate(custom = "not_blank")]
    pub title: String,
    #[serde(default)]
    pub image: String,
    #[validate(custom = "non_negative")]
    #[schema(value_type = String, example = "20.00")]
    pub price: Decimal,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    #[serde(default)]
    pub selected_color: String,
    #[serde(default)]
    pub selected_size: String,
}

impl LineItemInput {
    /// Unit price as recorded and charged, in whole cents.
    pub fn unit_price(&self) -> Decimal {
        round_money(self.price)
    }

    /// `None` when the product does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price().checked_mul(Decimal::from(self.quantity))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: String,
    pub shop_id: String,
    pub title: String,
    pub image: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub quantity: i32,
    pub selected_color: String,
    pub selected_size: String,
    #[schema(value_type = String)]
    pub platform_fee: Decimal,
    #[schema(value_type = String)]
    pub seller_earnings: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            product_id: item.product_id,
            shop_id: item.shop_id,
            title: item.title,
            image: item.image,
            price: cents(item.price),
            quantity: item.quantity,
            selected_color: item.selected_color,
            selected_size: item.selected_size,
            platform_fee: cents(item.platform_fee),
            seller_earnings: cents(item.seller_earnings),
        }
    }
}

/// Order as returned to storefront and dashboards.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: uuid::Uuid,
    /// Human-facing order reference
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<OrderItemResponse>,
    pub shipping_address: ShippingAddress,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[schema(value_type = String)]
    pub tax: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub coupon_code: String,
    pub estimated_delivery: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_models(
        order: order::Model,
        mut items: Vec<order_item::Model>,
    ) -> Result<Self, ServiceError> {
        items.sort_by_key(|item| item.position);
        let shipping_address: ShippingAddress = serde_json::from_str(&order.shipping_address)?;

        Ok(Self {
            id: order.id,
            order_id: order.order_number,
            user_id: order.user_id,
            items: items.into_iter().map(OrderItemResponse::from).collect(),
            shipping_address,
            subtotal: cents(order.subtotal),
            shipping_cost: cents(order.shipping_cost),
            discount: cents(order.discount),
            tax: cents(order.tax),
            total: cents(order.total),
            payment_method: parse_status("payment method", &order.payment_method)?,
            payment_status: parse_status("payment status", &order.payment_status)?,
            status: parse_status("status", &order.status)?,
            stripe_session_id: order.stripe_session_id,
            stripe_payment_intent_id: order.stripe_payment_intent_id,
            coupon_code: order.coupon_code,
            estimated_delivery: order.estimated_delivery,
            delivered_at: order.delivered_at,
            cancelled_at: order.cancelled_at,
            cancel_reason: order.cancel_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}

/// Entry in a buyer's online payment history.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub order_id: String,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub stripe_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<order::Model> for PaymentRecord {
    type Error = ServiceError;

    fn try_from(order: order::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            order_id: order.order_number,
            total: cents(order.total),
            payment_status: parse_status("payment status", &order.payment_status)?,
            payment_method: parse_status("payment method", &order.payment_method)?,
            stripe_session_id: order.stripe_session_id,
            created_at: order.created_at,
        })
    }
}
