#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use fake::{
    faker::{
        address::en::{CityName, StateAbbr, StreetName, ZipCode},
        name::en::Name,
        phone_number::en::PhoneNumber,
    },
    Fake,
};
use marketplace_orders::{
    auth::rbac::Role,
    config::AppConfig,
    db::{self, DbConfig},
    events::{self, EventSender},
    services::payment_provider::{sign_payload, StripeProvider, SIGNATURE_HEADER},
    AppState,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
const JWT_SECRET: &str = "integration_jwt_secret_with_enough_entropy_42";

/// Helper harness: the full router over a migrated SQLite file, with Stripe
/// replaced by a local mock server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub stripe: MockServer,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let stripe = MockServer::start().await;

        let mut cfg = AppConfig::new(
            format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("orders.db").display()
            ),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.stripe_secret_key = "sk_test_integration".to_string();
        cfg.stripe_webhook_secret = WEBHOOK_SECRET.to_string();
        cfg.stripe_api_base = stripe.uri();
        cfg.frontend_url = "https://shop.example".to_string();

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let provider = Arc::new(StripeProvider::new(&cfg).expect("stripe client"));
        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(event_tx), provider);
        let router = marketplace_orders::app_router(state.clone());

        Self {
            router,
            state,
            stripe,
            _dir: dir,
            _event_task: event_task,
        }
    }

    /// Mints an access token the way the auth service does.
    pub fn token(&self, user_id: &str, role: Role) -> String {
        let claims = json!({
            "id": user_id,
            "role": role.to_string(),
            "email": format!("{}@example.com", user_id),
            "exp": (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        });
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    pub fn buyer(&self, id: &str) -> String {
        self.token(id, Role::Buyer)
    }

    pub fn seller(&self, id: &str) -> String {
        self.token(id, Role::Seller)
    }

    pub fn admin(&self) -> String {
        self.token("admin-1", Role::Admin)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Sends a request and decodes the JSON answer.
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        let status = response.status();
        (status, response_json(response).await)
    }

    /// Posts a webhook body with the given signature header.
    pub async fn post_webhook(&self, payload: &[u8], signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request");
        let status = response.status();
        (status, response_json(response).await)
    }

    /// Posts a correctly signed webhook body.
    pub async fn deliver_signed(&self, event: &Value) -> (StatusCode, Value) {
        let payload = serde_json::to_vec(event).expect("serialize event");
        let signature =
            sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp()).expect("sign payload");
        self.post_webhook(&payload, Some(&signature)).await
    }

    /// Makes `GET /v1/checkout/sessions/{id}` on the mock Stripe answer with `session`.
    pub async fn stub_retrieve(&self, session: &Value) {
        let id = session["id"].as_str().expect("session id");
        Mock::given(method("GET"))
            .and(path(format!("/v1/checkout/sessions/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(session))
            .mount(&self.stripe)
            .await;
    }

    /// Makes session creation on the mock Stripe succeed with `session_id`.
    pub async fn stub_create(&self, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": session_id,
                "url": format!("https://checkout.stripe.test/pay/{}", session_id),
            })))
            .mount(&self.stripe)
            .await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is JSON")
    }
}

/// A random but complete delivery address.
pub fn address() -> Value {
    json!({
        "fullName": Name().fake::<String>(),
        "phone": PhoneNumber().fake::<String>(),
        "street": StreetName().fake::<String>(),
        "city": CityName().fake::<String>(),
        "state": StateAbbr().fake::<String>(),
        "zipCode": ZipCode().fake::<String>(),
        "country": "US",
    })
}

pub fn item(shop_id: &str, price: &str, quantity: i32) -> Value {
    json!({
        "productId": format!("prod-{}", shop_id),
        "shopId": shop_id,
        "title": "Ceramic mug",
        "image": "https://cdn.example/mug.png",
        "price": price,
        "quantity": quantity,
        "selectedColor": "blue",
        "selectedSize": "",
    })
}

/// Metadata as the checkout endpoint attaches it to a session.
pub fn session_metadata(
    user_id: &str,
    items: &[Value],
    shipping_cost: &str,
    tax: &str,
) -> HashMap<String, String> {
    HashMap::from([
        ("userId".to_string(), user_id.to_string()),
        ("items".to_string(), Value::Array(items.to_vec()).to_string()),
        ("shippingAddress".to_string(), address().to_string()),
        ("couponCode".to_string(), String::new()),
        ("discount".to_string(), "0".to_string()),
        ("tax".to_string(), tax.to_string()),
        ("shippingCost".to_string(), shipping_cost.to_string()),
    ])
}

pub fn paid_session(session_id: &str, metadata: &HashMap<String, String>) -> Value {
    json!({
        "id": session_id,
        "object": "checkout.session",
        "payment_status": "paid",
        "payment_intent": format!("pi_{}", session_id),
        "metadata": metadata,
    })
}

pub fn completed_event(event_id: &str, session: &Value) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": session },
    })
}
