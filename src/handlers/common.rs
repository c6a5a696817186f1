use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::order::{OrderResponse, PaymentRecord};
use crate::services::orders::{OrderStats, Page};

/// Page/limit query shared by listings without extra filters
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Pagination block attached to every list response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaginationMeta {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let pages = if total == 0 || limit == 0 {
            0
        } else {
            (total + limit - 1) / limit
        };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}

impl<T> From<&Page<T>> for PaginationMeta {
    fn from(page: &Page<T>) -> Self {
        Self::new(page.page, page.limit, page.total)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderEnvelope {
    pub success: bool,
    pub order: OrderResponse,
}

impl OrderEnvelope {
    pub fn new(order: OrderResponse) -> Self {
        Self {
            success: true,
            order,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub success: bool,
    pub orders: Vec<OrderResponse>,
    pub pagination: PaginationMeta,
}

impl From<Page<OrderResponse>> for OrderListResponse {
    fn from(page: Page<OrderResponse>) -> Self {
        let pagination = PaginationMeta::from(&page);
        Self {
            success: true,
            orders: page.items,
            pagination,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelOrderResponse {
    pub success: bool,
    pub message: String,
    pub order: OrderResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderStatsResponse {
    pub success: bool,
    pub stats: OrderStats,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub success: bool,
    pub url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentHistoryResponse {
    pub success: bool,
    pub payments: Vec<PaymentRecord>,
    pub pagination: PaginationMeta,
}

impl From<Page<PaymentRecord>> for PaymentHistoryResponse {
    fn from(page: Page<PaymentRecord>) -> Self {
        let pagination = PaginationMeta::from(&page);
        Self {
            success: true,
            payments: page.items,
            pagination,
        }
    }
}

/// Acknowledgement returned to the payment provider
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 10, 0 ; "empty listing has no pages")]
    #[test_case(10, 10, 1 ; "exact fit")]
    #[test_case(11, 10, 2 ; "partial last page")]
    #[test_case(95, 20, 5 ; "rounds up")]
    fn pages_round_up(total: u64, limit: u64, pages: u64) {
        assert_eq!(PaginationMeta::new(1, limit, total).pages, pages);
    }

    #[test]
    fn payment_history_carries_pagination() {
        let page: Page<PaymentRecord> = Page {
            items: Vec::new(),
            page: 3,
            limit: 5,
            total: 12,
        };
        let body = serde_json::to_value(PaymentHistoryResponse::from(page)).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["pagination"]["page"], 3);
        assert_eq!(body["pagination"]["pages"], 3);
        assert!(body["payments"].as_array().unwrap().is_empty());
    }
}
