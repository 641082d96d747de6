use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "production_orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub order_id: i32,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,

    pub recipe_id: i32,

    pub batch_size: f64,

    pub scheduled_date: NaiveDate,

    /// One of `planned`, `verified`, `rejected`, `completed`.
    /// At most one row is `verified` at any time.
    pub status: String,

    /// Operator identifier of the creator
    pub created_by: String,

    pub notes: Option<String>,

    pub barcode_id: Option<String>,

    /// Average per-batch setpoint total, for display
    pub dosing: Option<f64>,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recipe::Entity",
        from = "Column::RecipeId",
        to = "super::recipe::Column::RecipeId"
    )]
    Recipe,
    #[sea_orm(has_many = "super::batch::Entity")]
    Batches,
}

impl Related<super::recipe::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipe.def()
    }
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batches.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
