pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
