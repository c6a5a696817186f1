use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-facing reference, `NM-<base36 millis>-<6 hex>`
    #[sea_orm(unique)]
    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    pub user_id: String,

    /// JSON encoded [`crate::models::order::ShippingAddress`]
    pub shipping_address: String,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,

    pub payment_method: String,
    pub payment_status: String,
    pub status: String,

    #[sea_orm(unique)]
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,

    pub coupon_code: String,
    pub estimated_delivery: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if !insert {
            if let ActiveValue::NotSet = active_model.updated_at {
                active_model.updated_at = Set(Utc::now());
            }
        }
        Ok(active_model)
    }
}
