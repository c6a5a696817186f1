use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget variant; a full or closed channel only logs.
    pub fn notify(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping order event: {}", e);
        }
    }
}

/// Order lifecycle notifications consumed by the notifier task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        user_id: String,
        payment_method: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: String,
    },
    /// A checkout session was confirmed again after its order already existed.
    CheckoutSessionReplayed {
        session_id: String,
        order_id: Uuid,
    },
}

/// Drains the channel until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::OrderCreated {
                order_id,
                order_number,
                user_id,
                payment_method,
            } => {
                if let Err(e) =
                    handle_order_created(order_id, &order_number, &user_id, &payment_method).await
                {
                    error!(
                        "Failed to handle order created event: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} moved from {} to {}",
                    order_id, old_status, new_status
                );
            }
            Event::OrderCancelled { order_id, reason } => {
                info!("Order {} cancelled: {}", order_id, reason);
            }
            Event::CheckoutSessionReplayed {
                session_id,
                order_id,
            } => {
                info!(
                    "Checkout session {} already materialized as order {}",
                    session_id, order_id
                );
            }
        }
    }

    warn!("Event processing loop has ended");
}

async fn handle_order_created(
    order_id: Uuid,
    order_number: &str,
    user_id: &str,
    payment_method: &str,
) -> Result<(), String> {
    if order_number.is_empty() {
        return Err("order created without an order number".to_string());
    }
    info!(
        "Sending order confirmation for {} ({}) to user {} via {}",
        order_number, order_id, user_id, payment_method
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();

        sender
            .send(Event::OrderCancelled {
                order_id,
                reason: "changed mind".into(),
            })
            .await
            .unwrap();
        sender.notify(Event::OrderStatusChanged {
            order_id,
            old_status: "pending".into(),
            new_status: "confirmed".into(),
        });

        assert!(matches!(rx.recv().await, Some(Event::OrderCancelled { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(Event::OrderStatusChanged { .. })
        ));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        let err = sender
            .send(Event::OrderCancelled {
                order_id: Uuid::new_v4(),
                reason: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.starts_with("Failed to send event"));

        // notify never surfaces the failure
        sender.notify(Event::OrderCancelled {
            order_id: Uuid::new_v4(),
            reason: String::new(),
        });
    }

    #[tokio::test]
    async fn processing_loop_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(process_events(rx));
        tx.send(Event::CheckoutSessionReplayed {
            session_id: "cs_test".into(),
            order_id: Uuid::new_v4(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
