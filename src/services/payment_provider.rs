use crate::{config::AppConfig, errors::ServiceError};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{error, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Event type emitted once the buyer has paid for a checkout session.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// One priced line on the hosted checkout page; amounts are in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutLineItem {
    pub name: String,
    pub image: Option<String>,
    pub unit_amount: i64,
    pub quantity: i64,
}

/// Amount taken off the whole session, in cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutDiscount {
    pub name: String,
    pub amount_off: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<CheckoutLineItem>,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub discount: Option<CheckoutDiscount>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Coupon {
    id: String,
}

/// Checkout session ids are `cs_` followed by letters, digits and underscores.
pub fn is_checkout_session_id(id: &str) -> bool {
    id.strip_prefix("cs_").is_some_and(|rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Session handle returned on creation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Provider-side view of a checkout session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// Verified webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

impl WebhookEvent {
    /// Decodes the event payload as a checkout session.
    pub fn checkout_session(&self) -> Result<ProviderSession, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

/// Hosted-checkout payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    /// Authenticates a raw webhook body; nothing else may run before this.
    fn construct_event(&self, payload: &[u8], signature: &str)
        -> Result<WebhookEvent, ServiceError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession, ServiceError>;
}

/// Produces a `t=<ts>,v1=<hex>` signature header for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, ServiceError> {
    let mac = keyed_mac(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn keyed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("Invalid webhook key: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Checks a `t=<ts>,v1=<sig>[,v1=<sig>...]` header against `payload`.
///
/// The timestamp must lie within `tolerance` of `now` (unix seconds) and one
/// of the `v1` signatures must match; comparison is constant-time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), ServiceError> {
    if secret.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "Webhook secret is not configured".to_string(),
        ));
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return Err(ServiceError::InvalidSignature(
            "Unable to extract timestamp from signature header".to_string(),
        ));
    };
    if candidates.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "No v1 signature found in header".to_string(),
        ));
    }
    if now.abs_diff(timestamp) > tolerance.as_secs() {
        return Err(ServiceError::InvalidSignature(
            "Timestamp outside the tolerance zone".to_string(),
        ));
    }

    let mac = keyed_mac(secret, timestamp, payload)?;
    let matched = candidates.iter().any(|candidate| match hex::decode(candidate) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if matched {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature(
            "No signature matches the payload".to_string(),
        ))
    }
}

/// Stripe Checkout over its REST API.
#[derive(Debug, Clone)]
pub struct StripeProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    tolerance: Duration,
}

impl StripeProvider {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.payment_provider_timeout())
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            tolerance: Duration::from_secs(config.webhook_tolerance_secs),
        })
    }

    fn session_form(
        request: &CheckoutSessionRequest,
        coupon_id: Option<&str>,
    ) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        if let Some(coupon_id) = coupon_id {
            form.push(("discounts[0][coupon]".to_string(), coupon_id.to_string()));
        }

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                request.currency.clone(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            if let Some(image) = item.image.as_ref().filter(|s| !s.is_empty()) {
                form.push((
                    format!("{}[price_data][product_data][images][0]", prefix),
                    image.clone(),
                ));
            }
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount.to_string(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        form
    }

    /// Single-use coupon so the hosted page charges the discounted amount.
    #[instrument(skip(self, discount), fields(amount_off = discount.amount_off))]
    async fn create_coupon(
        &self,
        discount: &CheckoutDiscount,
        currency: &str,
    ) -> Result<String, ServiceError> {
        let name: String = discount.name.chars().take(40).collect();
        let response = self
            .client
            .post(format!("{}/v1/coupons", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount_off", discount.amount_off.to_string()),
                ("currency", currency.to_string()),
                ("duration", "once".to_string()),
                ("max_redemptions", "1".to_string()),
                ("name", name),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let coupon: Coupon = Self::read_json(response, "Coupon").await?;
        Ok(coupon.id)
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!("{} not found", what)));
        }
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("no error message")
                .to_string();
            error!(%status, %message, "Stripe rejected request");
            return Err(ServiceError::ExternalServiceError(format!(
                "Stripe returned {}: {}",
                status, message
            )));
        }
        response.json::<T>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Malformed Stripe response: {}", e))
        })
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        warn!("Stripe request timed out");
        ServiceError::ExternalServiceError("Stripe request timed out".to_string())
    } else {
        ServiceError::ExternalServiceError(format!("Stripe request failed: {}", err))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let coupon_id = match request.discount.as_ref().filter(|d| d.amount_off > 0) {
            Some(discount) => Some(self.create_coupon(discount, &request.currency).await?),
            None => None,
        };

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::session_form(&request, coupon_id.as_deref()))
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_json(response, "Checkout session").await
    }

    fn construct_event(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ServiceError> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance,
            chrono::Utc::now().timestamp(),
        )?;
        serde_json::from_slice(payload)
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid webhook payload: {}", e)))
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession, ServiceError> {
        if !is_checkout_session_id(session_id) {
            return Err(ServiceError::NotFound("Checkout session not found".to_string()));
        }
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_json(response, "Checkout session").await
    }
}
