use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Material master data. Authoring lives outside this service; rows are
/// referenced for display names and barcode lookups.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "materials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub material_id: i32,

    pub name: String,

    pub barcode_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recipe_material::Entity")]
    RecipeMaterials,
}

impl Related<super::recipe_material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecipeMaterials.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
