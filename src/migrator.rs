use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_material_batches_table::Migration),
            Box::new(m20250101_000002_create_usage_records_table::Migration),
            Box::new(m20250101_000003_create_settlements_table::Migration),
            Box::new(m20250101_000004_create_material_expenses_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250101_000001_create_material_batches_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_material_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MaterialBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MaterialBatches::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::BatchRef)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(MaterialBatches::GroupId).uuid().not_null())
                        .col(
                            ColumnDef::new(MaterialBatches::MaterialId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::MaterialName)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MaterialBatches::Brand).string().null())
                        .col(ColumnDef::new(MaterialBatches::Unit).string().not_null())
                        .col(
                            ColumnDef::new(MaterialBatches::PayingSiteId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::PurchaseDate)
                                .date()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::OriginalQty)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::UsedQty)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::RemainingQty)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::UnitCost)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::TotalAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MaterialBatches::Status).string().not_null())
                        .col(ColumnDef::new(MaterialBatches::CreatedBy).string().null())
                        .col(
                            ColumnDef::new(MaterialBatches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialBatches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // FIFO scan: open batches of a material ordered by purchase date then ref
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_material_batches_fifo")
                        .table(MaterialBatches::Table)
                        .col(MaterialBatches::GroupId)
                        .col(MaterialBatches::MaterialId)
                        .col(MaterialBatches::PurchaseDate)
                        .col(MaterialBatches::BatchRef)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MaterialBatches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum MaterialBatches {
        Table,
        Id,
        BatchRef,
        GroupId,
        MaterialId,
        MaterialName,
        Brand,
        Unit,
        PayingSiteId,
        PurchaseDate,
        OriginalQty,
        UsedQty,
        RemainingQty,
        UnitCost,
        TotalAmount,
        Status,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000002_create_usage_records_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_usage_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(UsageRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UsageRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsageRecords::BatchId).uuid().not_null())
                        .col(ColumnDef::new(UsageRecords::BatchRef).string().not_null())
                        .col(ColumnDef::new(UsageRecords::GroupId).uuid().not_null())
                        .col(ColumnDef::new(UsageRecords::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(UsageRecords::UsageSiteId).uuid().not_null())
                        .col(
                            ColumnDef::new(UsageRecords::PayingSiteId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsageRecords::Quantity).decimal().not_null())
                        .col(ColumnDef::new(UsageRecords::UnitCost).decimal().not_null())
                        .col(
                            ColumnDef::new(UsageRecords::TotalCost)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsageRecords::UsageDate).date().not_null())
                        .col(
                            ColumnDef::new(UsageRecords::WorkDescription)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(UsageRecords::SettlementStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageRecords::SettlementCode)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(UsageRecords::CreatedBy).string().null())
                        .col(
                            ColumnDef::new(UsageRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UsageRecords::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Inter-site balance lookup: pending rows per (debtor, creditor) pair
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_usage_records_balance")
                        .table(UsageRecords::Table)
                        .col(UsageRecords::UsageSiteId)
                        .col(UsageRecords::PayingSiteId)
                        .col(UsageRecords::SettlementStatus)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_usage_records_batch_ref")
                        .table(UsageRecords::Table)
                        .col(UsageRecords::BatchRef)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UsageRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum UsageRecords {
        Table,
        Id,
        BatchId,
        BatchRef,
        GroupId,
        MaterialId,
        UsageSiteId,
        PayingSiteId,
        Quantity,
        UnitCost,
        TotalCost,
        UsageDate,
        WorkDescription,
        SettlementStatus,
        SettlementCode,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000003_create_settlements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_settlements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Settlements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Settlements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::SettlementCode)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Settlements::DebtorSiteId).uuid().not_null())
                        .col(
                            ColumnDef::new(Settlements::CreditorSiteId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Settlements::BatchRef).string().null())
                        .col(
                            ColumnDef::new(Settlements::CalculatedAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::SettlementAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::PaymentMode)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Settlements::PaymentDate).date().not_null())
                        .col(
                            ColumnDef::new(Settlements::PaymentReference)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Settlements::ProofRef).string().null())
                        .col(ColumnDef::new(Settlements::Status).string().not_null())
                        .col(
                            ColumnDef::new(Settlements::RecordsCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Settlements::CreatedBy).string().null())
                        .col(ColumnDef::new(Settlements::CancelReason).string().null())
                        .col(
                            ColumnDef::new(Settlements::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Settlements::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Settlements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Settlements {
        Table,
        Id,
        SettlementCode,
        DebtorSiteId,
        CreditorSiteId,
        BatchRef,
        CalculatedAmount,
        SettlementAmount,
        PaymentMode,
        PaymentDate,
        PaymentReference,
        ProofRef,
        Status,
        RecordsCount,
        CreatedBy,
        CancelReason,
        CancelledAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250101_000004_create_material_expenses_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_material_expenses_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(MaterialExpenses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MaterialExpenses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MaterialExpenses::SiteId).uuid().not_null())
                        .col(
                            ColumnDef::new(MaterialExpenses::Amount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(MaterialExpenses::Description)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MaterialExpenses::BatchRef).string().null())
                        .col(
                            ColumnDef::new(MaterialExpenses::SettlementCode)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MaterialExpenses::UsageRecordId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MaterialExpenses::PaymentMode)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(MaterialExpenses::PaymentDate).date().null())
                        .col(
                            ColumnDef::new(MaterialExpenses::PaymentReference)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(MaterialExpenses::ProofRef).string().null())
                        .col(
                            ColumnDef::new(MaterialExpenses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_material_expenses_settlement_code")
                        .table(MaterialExpenses::Table)
                        .col(MaterialExpenses::SettlementCode)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MaterialExpenses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum MaterialExpenses {
        Table,
        Id,
        SiteId,
        Amount,
        Description,
        BatchRef,
        SettlementCode,
        UsageRecordId,
        PaymentMode,
        PaymentDate,
        PaymentReference,
        ProofRef,
        CreatedAt,
    }
}
