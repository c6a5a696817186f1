use std::sync::Arc;

use rust_decimal::Decimal;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
use crate::events::{Event, EventSender};
use crate::models::order::{LineItemInput, ShippingAddress};
use crate::repositories::order_repository::OrderRepository;
use crate::services::orders::OrderService;

pub struct ServiceFixture {
    pub orders: Arc<OrderService>,
    pub config: Arc<AppConfig>,
    pub events: mpsc::Receiver<Event>,
    _dir: TempDir,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::new(
        "sqlite::memory:".into(),
        "a_test_secret_that_is_long_enough_123".into(),
        "127.0.0.1".into(),
        0,
        "development".into(),
    );
    config.stripe_webhook_secret = "whsec_test_secret".into();
    config
}

/// Order service over a migrated SQLite file in a temp dir.
pub async fn fixture() -> ServiceFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("orders.db").display()
    );
    let db = establish_connection_with_config(&DbConfig {
        url,
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("connect");
    run_migrations(&db).await.expect("migrate");

    let (tx, rx) = mpsc::channel(64);
    let config = Arc::new(test_config());
    let orders = Arc::new(OrderService::new(
        OrderRepository::new(Arc::new(db)),
        Arc::new(EventSender::new(tx)),
        config.clone(),
    ));
    ServiceFixture {
        orders,
        config,
        events: rx,
        _dir: dir,
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Lovelace".into(),
        phone: "555-0100".into(),
        street: "1 Analytical Way".into(),
        city: "London".into(),
        state: "LDN".into(),
        zip_code: "NW1".into(),
        country: "UK".into(),
    }
}

pub fn line(shop_id: &str, price: Decimal, quantity: i32) -> LineItemInput {
    LineItemInput {
        product_id: format!("prod-{}", shop_id),
        shop_id: shop_id.into(),
        title: "Mug".into(),
        image: String::new(),
        price,
        quantity,
        selected_color: String::new(),
        selected_size: String::new(),
    }
}
