use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_orders_table::Migration),
            Box::new(m20240601_000002_create_order_items_table::Migration),
        ]
    }
}

/// Name of the unique index guarding write-once order materialization.
pub const STRIPE_SESSION_INDEX: &str = "idx_orders_stripe_session_id";
/// Name of the unique index on the human-facing order reference.
pub const ORDER_NUMBER_INDEX: &str = "idx_orders_order_number";

mod m20240601_000001_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string_len(50).not_null())
                        .col(ColumnDef::new(Orders::UserId).string().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::Subtotal).decimal_len(12, 2).not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Discount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Tax)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::StripeSessionId).string().null())
                        .col(ColumnDef::new(Orders::StripePaymentIntentId).string().null())
                        .col(
                            ColumnDef::new(Orders::CouponCode)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(Orders::EstimatedDelivery)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::CancelReason).string().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(super::ORDER_NUMBER_INDEX)
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // NULLs are distinct in both Postgres and SQLite unique indexes,
            // so only orders that carry a session id are constrained.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(super::STRIPE_SESSION_INDEX)
                        .table(Orders::Table)
                        .col(Orders::StripeSessionId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id_created_at")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        ShippingAddress,
        Subtotal,
        ShippingCost,
        Discount,
        Tax,
        Total,
        PaymentMethod,
        PaymentStatus,
        Status,
        StripeSessionId,
        StripePaymentIntentId,
        CouponCode,
        EstimatedDelivery,
        DeliveredAt,
        CancelledAt,
        CancelReason,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20240601_000002_create_order_items_table {
    use super::m20240601_000001_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Position).integer().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).string().not_null())
                        .col(ColumnDef::new(OrderItems::ShopId).string().not_null())
                        .col(ColumnDef::new(OrderItems::Title).string().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Image)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(OrderItems::Price).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::SelectedColor)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(OrderItems::SelectedSize)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(OrderItems::PlatformFee)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::SellerEarnings)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_shop_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::ShopId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        Position,
        ProductId,
        ShopId,
        Title,
        Image,
        Price,
        Quantity,
        SelectedColor,
        SelectedSize,
        PlatformFee,
        SellerEarnings,
    }
}
