use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_recipes_table::Migration),
            Box::new(m20250101_000002_create_materials_table::Migration),
            Box::new(m20250101_000003_create_recipe_materials_table::Migration),
            Box::new(m20250101_000004_create_dosed_materials_table::Migration),
            Box::new(m20250101_000005_create_production_orders_table::Migration),
            Box::new(m20250101_000006_create_batches_table::Migration),
            Box::new(m20250101_000007_create_scale_readings_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250101_000001_create_recipes_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000001_create_recipes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Recipes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Recipes::RecipeId)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Recipes::Name).string().not_null())
                        .col(
                            ColumnDef::new(Recipes::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Recipes::Description).string())
                        .col(ColumnDef::new(Recipes::BarcodeId).string().unique_key())
                        .col(
                            ColumnDef::new(Recipes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Recipes::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Recipes {
        Table,
        RecipeId,
        Name,
        Code,
        Description,
        BarcodeId,
        CreatedAt,
    }
}

mod m20250101_000002_create_materials_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000002_create_materials_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Materials::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Materials::MaterialId)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Materials::Name).string().not_null())
                        .col(ColumnDef::new(Materials::BarcodeId).string().unique_key())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Materials::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Materials {
        Table,
        MaterialId,
        Name,
        BarcodeId,
    }
}

mod m20250101_000003_create_recipe_materials_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000003_create_recipe_materials_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RecipeMaterials::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RecipeMaterials::RecipeMaterialId)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RecipeMaterials::RecipeId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RecipeMaterials::MaterialId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RecipeMaterials::Sequence)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RecipeMaterials::SetPoint)
                                .double()
                                .not_null(),
                        )
                        .col(ColumnDef::new(RecipeMaterials::Actual).double())
                        .col(ColumnDef::new(RecipeMaterials::Margin).double())
                        .col(ColumnDef::new(RecipeMaterials::Status).string().not_null())
                        .col(ColumnDef::new(RecipeMaterials::BucketId).integer())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_recipe_materials_recipe")
                                .from(RecipeMaterials::Table, RecipeMaterials::RecipeId)
                                .to(Recipes::Table, Recipes::RecipeId),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_recipe_materials_material")
                                .from(RecipeMaterials::Table, RecipeMaterials::MaterialId)
                                .to(Materials::Table, Materials::MaterialId),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_recipe_materials_recipe_material")
                        .table(RecipeMaterials::Table)
                        .col(RecipeMaterials::RecipeId)
                        .col(RecipeMaterials::MaterialId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_recipe_materials_recipe_sequence")
                        .table(RecipeMaterials::Table)
                        .col(RecipeMaterials::RecipeId)
                        .col(RecipeMaterials::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RecipeMaterials::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum RecipeMaterials {
        Table,
        RecipeMaterialId,
        RecipeId,
        MaterialId,
        Sequence,
        SetPoint,
        Actual,
        Margin,
        Status,
        BucketId,
    }

    #[derive(Iden)]
    enum Recipes {
        Table,
        RecipeId,
    }

    #[derive(Iden)]
    enum Materials {
        Table,
        MaterialId,
    }
}

mod m20250101_000004_create_dosed_materials_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000004_create_dosed_materials_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DosedMaterials::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DosedMaterials::Id)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DosedMaterials::RecipeId).integer().not_null())
                        .col(
                            ColumnDef::new(DosedMaterials::MaterialId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DosedMaterials::SetPoint).double().not_null())
                        .col(ColumnDef::new(DosedMaterials::Actual).double().not_null())
                        .col(ColumnDef::new(DosedMaterials::Margin).double().not_null())
                        .col(ColumnDef::new(DosedMaterials::BatchSize).double().not_null())
                        .col(
                            ColumnDef::new(DosedMaterials::DosedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DosedMaterials::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum DosedMaterials {
        Table,
        Id,
        RecipeId,
        MaterialId,
        SetPoint,
        Actual,
        Margin,
        BatchSize,
        DosedAt,
    }
}

mod m20250101_000005_create_production_orders_table {

    use sea_orm_migration::prelude::*;
    use sea_orm_migration::sea_orm::ConnectionTrait;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000005_create_production_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductionOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductionOrders::OrderId)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::OrderNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::RecipeId)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::BatchSize)
                                .double()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::ScheduledDate)
                                .date()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductionOrders::Status).string().not_null())
                        .col(
                            ColumnDef::new(ProductionOrders::CreatedBy)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductionOrders::Notes).string())
                        .col(
                            ColumnDef::new(ProductionOrders::BarcodeId)
                                .string()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(ProductionOrders::Dosing).double())
                        .col(
                            ColumnDef::new(ProductionOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_production_orders_recipe")
                                .from(ProductionOrders::Table, ProductionOrders::RecipeId)
                                .to(Recipes::Table, Recipes::RecipeId),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_production_orders_status")
                        .table(ProductionOrders::Table)
                        .col(ProductionOrders::Status)
                        .to_owned(),
                )
                .await?;

            // At most one row may be `verified` at any time. Partial unique
            // indexes are not expressible through the schema builder, and
            // both SQLite and Postgres accept this form.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_production_orders_single_verified \
                     ON production_orders (status) WHERE status = 'verified'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductionOrders::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum ProductionOrders {
        Table,
        OrderId,
        OrderNumber,
        RecipeId,
        BatchSize,
        ScheduledDate,
        Status,
        CreatedBy,
        Notes,
        BarcodeId,
        Dosing,
        CreatedAt,
    }

    #[derive(Iden)]
    enum Recipes {
        Table,
        RecipeId,
    }
}

mod m20250101_000006_create_batches_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000006_create_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Batches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Batches::BatchId)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Batches::BatchNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Batches::OrderId).integer().not_null())
                        .col(ColumnDef::new(Batches::Operator).string().not_null())
                        .col(ColumnDef::new(Batches::Status).string().not_null())
                        .col(ColumnDef::new(Batches::Notes).string())
                        .col(
                            ColumnDef::new(Batches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batches_order")
                                .from(Batches::Table, Batches::OrderId)
                                .to(ProductionOrders::Table, ProductionOrders::OrderId),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Batches::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Batches {
        Table,
        BatchId,
        BatchNumber,
        OrderId,
        Operator,
        Status,
        Notes,
        CreatedAt,
    }

    #[derive(Iden)]
    enum ProductionOrders {
        Table,
        OrderId,
    }
}

mod m20250101_000007_create_scale_readings_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250101_000007_create_scale_readings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ScaleReadings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ScaleReadings::ReadingId)
                                .integer()
                                .auto_increment()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ScaleReadings::Weight).double().not_null())
                        .col(ColumnDef::new(ScaleReadings::ErrorCode).integer().not_null())
                        .col(
                            ColumnDef::new(ScaleReadings::ErrorMessage)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ScaleReadings::RecordedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ScaleReadings::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum ScaleReadings {
        Table,
        ReadingId,
        Weight,
        ErrorCode,
        ErrorMessage,
        RecordedAt,
    }
}
