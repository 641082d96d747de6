use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One dosing step of a recipe.
///
/// `set_point` is the target weight for the current batch: it is multiplied
/// by the batch size when a production order is created and divided back when
/// the final material of a batch is dosed. `margin` holds the configured
/// tolerance in grams until the material is dosed, then the signed deviation
/// `(actual - set_point) * 1000`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "recipe_materials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub recipe_material_id: i32,

    pub recipe_id: i32,

    pub material_id: i32,

    /// Dosing order within the recipe; strictly ascending, unique per recipe
    pub sequence: i32,

    pub set_point: f64,

    pub actual: Option<f64>,

    pub margin: Option<f64>,

    /// One of `pending`, `dosed`, `rejected`
    pub status: String,

    /// Storage bucket the material is dispensed from
    pub bucket_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recipe::Entity",
        from = "Column::RecipeId",
        to = "super::recipe::Column::RecipeId"
    )]
    Recipe,
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialId",
        to = "super::material::Column::MaterialId"
    )]
    Material,
}

impl Related<super::recipe::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipe.def()
    }
}

impl Related<super::material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Material.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
