use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate, ToSchema)]
#[sea_orm(table_name = "recipes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub recipe_id: i32,

    #[validate(length(min = 1, max = 120, message = "Recipe name must be between 1 and 120 characters"))]
    pub name: String,

    /// Unique recipe code used for lookups and labels
    pub code: String,

    pub description: Option<String>,

    /// Scannable identifier; unique when present
    pub barcode_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recipe_material::Entity")]
    RecipeMaterials,
    #[sea_orm(has_many = "super::production_order::Entity")]
    ProductionOrders,
}

impl Related<super::recipe_material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeMaterials.def()
    }
}

impl Related<super::production_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductionOrders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
