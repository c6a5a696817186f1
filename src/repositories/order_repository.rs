use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Query},
    ActiveValue::Set,
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, SqlErr, TransactionTrait,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, Column, Entity as Order};
use crate::entities::order_item::{self, Entity as OrderItem};
use crate::errors::ServiceError;
use crate::models::order::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::services::order_status::StatusChange;

/// Order row together with its line items, ordered by position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Failures of the write-once insert that callers need to tell apart.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order number already taken")]
    DuplicateOrderNumber,

    #[error("an order already exists for this checkout session")]
    DuplicateSession,

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateOrderNumber | StoreError::DuplicateSession => {
                ServiceError::Conflict(err.to_string())
            }
            StoreError::Db(db) => ServiceError::DatabaseError(db),
        }
    }
}

/// Maps unique-index violations onto the field they protect.
fn classify_insert_error(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) if message.contains("stripe_session_id") => {
            StoreError::DuplicateSession
        }
        Some(SqlErr::UniqueConstraintViolation(message)) if message.contains("order_number") => {
            StoreError::DuplicateOrderNumber
        }
        _ => StoreError::Db(err),
    }
}

/// Order row ready to be written; every derived field is already computed.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: String,
    pub shipping_address: String,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub coupon_code: String,
    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<NewOrderItem>,
}

#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: String,
    pub shop_id: String,
    pub title: String,
    pub image: String,
    pub price: Decimal,
    pub quantity: i32,
    pub selected_color: String,
    pub selected_size: String,
    pub platform_fee: Decimal,
    pub seller_earnings: Decimal,
}

/// Listing filter; every populated field narrows the result.
#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub user_id: Option<String>,
    /// Orders with at least one line item from this shop
    pub shop_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
}

/// Aggregate figures over every order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderTotals {
    pub total_orders: u64,
    pub total_revenue: Decimal,
    pub by_status: BTreeMap<String, u64>,
}

/// Durable order store
#[derive(Debug, Clone)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Writes the order and its items in one transaction.
    #[instrument(skip(self, new_order), fields(order_number = %new_order.order_number))]
    pub async fn insert(&self, new_order: NewOrder) -> Result<StoredOrder, StoreError> {
        let now = new_order.created_at;
        let order_row = order::ActiveModel {
            id: Set(new_order.id),
            order_number: Set(new_order.order_number),
            user_id: Set(new_order.user_id),
            shipping_address: Set(new_order.shipping_address),
            subtotal: Set(new_order.subtotal),
            shipping_cost: Set(new_order.shipping_cost),
            discount: Set(new_order.discount),
            tax: Set(new_order.tax),
            total: Set(new_order.total),
            payment_method: Set(new_order.payment_method.to_string()),
            payment_status: Set(new_order.payment_status.to_string()),
            status: Set(OrderStatus::Pending.to_string()),
            stripe_session_id: Set(new_order.stripe_session_id),
            stripe_payment_intent_id: Set(new_order.stripe_payment_intent_id),
            coupon_code: Set(new_order.coupon_code),
            estimated_delivery: Set(new_order.estimated_delivery),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            cancel_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };

        let item_rows: Vec<order_item::ActiveModel> = new_order
            .items
            .into_iter()
            .enumerate()
            .map(|(position, item)| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(new_order.id),
                position: Set(position as i32),
                product_id: Set(item.product_id),
                shop_id: Set(item.shop_id),
                title: Set(item.title),
                image: Set(item.image),
                price: Set(item.price),
                quantity: Set(item.quantity),
                selected_color: Set(item.selected_color),
                selected_size: Set(item.selected_size),
                platform_fee: Set(item.platform_fee),
                seller_earnings: Set(item.seller_earnings),
            })
            .collect();

        let txn = self.db.begin().await?;

        Order::insert(order_row)
            .exec_without_returning(&txn)
            .await
            .map_err(classify_insert_error)?;

        if !item_rows.is_empty() {
            OrderItem::insert_many(item_rows)
                .exec_without_returning(&txn)
                .await?;
        }

        let stored = load_one(&txn, new_order.id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(new_order.id.to_string()))?;

        txn.commit().await?;
        debug!(order_id = %stored.order.id, "order persisted");
        Ok(stored)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredOrder>, ServiceError> {
        Ok(load_one(self.db.as_ref(), id).await?)
    }

    pub async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<StoredOrder>, ServiceError> {
        let found = Order::find()
            .filter(Column::OrderNumber.eq(order_number))
            .one(self.db.as_ref())
            .await?;
        Ok(match found {
            Some(order) => Some(attach_items(self.db.as_ref(), order).await?),
            None => None,
        })
    }

    pub async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<StoredOrder>, ServiceError> {
        let found = Order::find()
            .filter(Column::StripeSessionId.eq(session_id))
            .one(self.db.as_ref())
            .await?;
        Ok(match found {
            Some(order) => Some(attach_items(self.db.as_ref(), order).await?),
            None => None,
        })
    }

    /// Newest-first page of orders matching `filter`, plus the total match count.
    /// `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: &OrderFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<StoredOrder>, u64), ServiceError> {
        let mut query = Order::find();

        if let Some(user_id) = &filter.user_id {
            query = query.filter(Column::UserId.eq(user_id.as_str()));
        }
        if let Some(shop_id) = &filter.shop_id {
            query = query.filter(
                Column::Id.in_subquery(
                    Query::select()
                        .column(order_item::Column::OrderId)
                        .from(OrderItem)
                        .and_where(order_item::Column::ShopId.eq(shop_id.as_str()))
                        .to_owned(),
                ),
            );
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.to_string()));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(Column::PaymentStatus.eq(payment_status.to_string()));
        }
        if let Some(method) = filter.payment_method {
            query = query.filter(Column::PaymentMethod.eq(method.to_string()));
        }

        let paginator = query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(self.db.as_ref(), limit);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let stored = attach_items_many(self.db.as_ref(), orders).await?;
        Ok((stored, total))
    }

    /// Applies `change` only if the row still carries `expected_version`.
    ///
    /// Returns `ConcurrentModification` when another writer got there first.
    #[instrument(skip(self, change), fields(to = %change.status))]
    pub async fn apply_status_change(
        &self,
        id: Uuid,
        expected_version: i32,
        change: &StatusChange,
        now: DateTime<Utc>,
    ) -> Result<StoredOrder, ServiceError> {
        let mut update = Order::update_many()
            .col_expr(Column::Status, Expr::value(change.status.to_string()))
            .col_expr(
                Column::PaymentStatus,
                Expr::value(change.payment_status.to_string()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::Version, Expr::col(Column::Version).add(1));

        if let Some(delivered_at) = change.delivered_at {
            update = update.col_expr(Column::DeliveredAt, Expr::value(delivered_at));
        }
        if let Some(cancelled_at) = change.cancelled_at {
            update = update.col_expr(Column::CancelledAt, Expr::value(cancelled_at));
        }
        if let Some(reason) = &change.cancel_reason {
            update = update.col_expr(Column::CancelReason, Expr::value(reason.clone()));
        }

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::Version.eq(expected_version))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id = %id, expected_version, "stale status update rejected");
            return Err(ServiceError::ConcurrentModification(id));
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Count, paid revenue and per-status breakdown. Not a snapshot.
    #[instrument(skip(self))]
    pub async fn totals(&self) -> Result<OrderTotals, ServiceError> {
        let db = self.db.as_ref();

        let total_orders = Order::find().count(db).await?;

        let by_status_rows: Vec<(String, i64)> = Order::find()
            .select_only()
            .column(Column::Status)
            .column_as(Expr::col(Column::Id).count(), "count")
            .group_by(Column::Status)
            .into_tuple()
            .all(db)
            .await?;

        let paid_totals: Vec<Decimal> = Order::find()
            .select_only()
            .column(Column::Total)
            .filter(Column::PaymentStatus.eq(PaymentStatus::Paid.to_string()))
            .into_tuple()
            .all(db)
            .await?;

        Ok(OrderTotals {
            total_orders,
            total_revenue: paid_totals.into_iter().sum(),
            by_status: by_status_rows
                .into_iter()
                .map(|(status, count)| (status, count.max(0) as u64))
                .collect(),
        })
    }
}

async fn load_one<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<StoredOrder>, DbErr> {
    match Order::find_by_id(id).one(db).await? {
        Some(order) => Ok(Some(attach_items(db, order).await?)),
        None => Ok(None),
    }
}

async fn attach_items<C: ConnectionTrait>(
    db: &C,
    order: order::Model,
) -> Result<StoredOrder, DbErr> {
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .order_by_asc(order_item::Column::Position)
        .all(db)
        .await?;
    Ok(StoredOrder { order, items })
}

async fn attach_items_many<C: ConnectionTrait>(
    db: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<StoredOrder>, DbErr> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut grouped: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
    for item in OrderItem::find()
        .filter(order_item::Column::OrderId.is_in(ids))
        .order_by_asc(order_item::Column::Position)
        .all(db)
        .await?
    {
        grouped.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = grouped.remove(&order.id).unwrap_or_default();
            StoredOrder { order, items }
        })
        .collect())
}
