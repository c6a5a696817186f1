//! Fulfillment state machine.
//!
//! `pending -> confirmed -> packed -> shipped -> out_for_delivery -> delivered`
//! is strictly linear. `cancelled` branches off `pending`/`confirmed` and
//! `returned` off `delivered`. Nothing else is legal.

use chrono::{DateTime, Utc};
use std::str::FromStr;

use crate::errors::ServiceError;
use crate::models::order::{OrderStatus, PaymentMethod, PaymentStatus};

/// Linear fulfillment sequence, in order.
pub const FULFILLMENT_SEQUENCE: [OrderStatus; 6] = [
    OrderStatus::Pending,
    OrderStatus::Confirmed,
    OrderStatus::Packed,
    OrderStatus::Shipped,
    OrderStatus::OutForDelivery,
    OrderStatus::Delivered,
];

impl OrderStatus {
    fn sequence_index(self) -> Option<usize> {
        FULFILLMENT_SEQUENCE.iter().position(|s| *s == self)
    }

    /// Whether the order may still be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        match to {
            OrderStatus::Cancelled => self.is_cancellable(),
            OrderStatus::Returned => self == OrderStatus::Delivered,
            _ => match (self.sequence_index(), to.sequence_index()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }
}

/// String form of the validator; unknown statuses never transition.
pub fn can_transition(from: &str, to: &str) -> bool {
    match (OrderStatus::from_str(from), OrderStatus::from_str(to)) {
        (Ok(from), Ok(to)) => from.can_transition_to(to),
        _ => false,
    }
}

/// Field values an accepted transition writes, computed before the write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

/// Snapshot of the fields a transition reads.
#[derive(Clone, Copy, Debug)]
pub struct StatusSnapshot {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
}

/// Validates `current -> to` and derives the payment side effects.
///
/// * `delivered` stamps the delivery time; cash-on-delivery becomes `paid`.
/// * `cancelled` stamps time and reason; `paid` becomes `refunded`.
/// * `returned` always becomes `refunded`.
pub fn plan_transition(
    current: StatusSnapshot,
    to: OrderStatus,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<StatusChange, ServiceError> {
    if !current.status.can_transition_to(to) {
        return Err(ServiceError::InvalidTransition(format!(
            "Cannot transition from \"{}\" to \"{}\"",
            current.status, to
        )));
    }

    let mut change = StatusChange {
        status: to,
        payment_status: current.payment_status,
        delivered_at: None,
        cancelled_at: None,
        cancel_reason: None,
    };

    match to {
        OrderStatus::Delivered => {
            change.delivered_at = Some(now);
            if current.payment_method == PaymentMethod::Cod {
                change.payment_status = PaymentStatus::Paid;
            }
        }
        OrderStatus::Cancelled => {
            change.cancelled_at = Some(now);
            change.cancel_reason = Some(reason.unwrap_or_default());
            if current.payment_status == PaymentStatus::Paid {
                change.payment_status = PaymentStatus::Refunded;
            }
        }
        OrderStatus::Returned => {
            change.payment_status = PaymentStatus::Refunded;
        }
        _ => {}
    }

    Ok(change)
}
