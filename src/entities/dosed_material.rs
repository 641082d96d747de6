use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Append-only audit entry written at the moment a material is dosed.
/// Rows are never updated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "dosed_materials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub recipe_id: i32,

    pub material_id: i32,

    /// Scaled setpoint in effect when the dose was accepted
    pub set_point: f64,

    pub actual: f64,

    /// Signed deviation in grams
    pub margin: f64,

    pub batch_size: f64,

    pub dosed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
