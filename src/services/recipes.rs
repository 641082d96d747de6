use crate::{
    db::DbPool,
    entities::{material, recipe, recipe_material},
    errors::ServiceError,
    events::{Event, EventSender},
    services::dosing::DoseStatus,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRecipeRequest {
    #[validate(length(min = 1, max = 120, message = "Recipe name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 60, message = "Recipe code is required"))]
    pub code: String,
    pub description: Option<String>,
    pub barcode_id: Option<String>,
}

/// Upsert payload for one recipe material. `margin` is the configured
/// tolerance in grams; `actual` is normally left unset and written by the
/// sequencer.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpsertRecipeMaterialRequest {
    pub recipe_id: i32,
    pub material_id: i32,
    #[validate(range(min = 1, message = "Sequence must be positive"))]
    pub sequence: i32,
    pub set_point: f64,
    pub margin: Option<f64>,
    pub actual: Option<f64>,
    pub status: Option<String>,
    pub bucket_id: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecipeListResponse {
    pub recipes: Vec<recipe::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Dosed or rejected material joined with its recipe and material names.
#[derive(Debug, Serialize, ToSchema)]
pub struct DosedMaterialView {
    pub recipe_material_id: i32,
    pub recipe_id: i32,
    pub recipe_name: String,
    pub material_id: i32,
    pub material_name: String,
    pub set_point: f64,
    pub actual: Option<f64>,
    pub margin: Option<f64>,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DosedMaterialsPage {
    pub materials: Vec<DosedMaterialView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Recipe and recipe-material authoring.
#[derive(Clone)]
pub struct RecipeService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl RecipeService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_recipe(
        &self,
        request: CreateRecipeRequest,
    ) -> Result<recipe::Model, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;

        let created = recipe::ActiveModel {
            name: Set(request.name),
            code: Set(request.code),
            description: Set(request.description),
            barcode_id: Set(request.barcode_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| {
            ServiceError::conflict_on_unique(e, "Duplicate entry: code or barcode_id already exists")
        })?;

        info!(recipe_id = created.recipe_id, "Recipe created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn list_recipes(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<RecipeListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let paginator = recipe::Entity::find()
            .order_by_asc(recipe::Column::RecipeId)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let recipes = paginator.fetch_page(page - 1).await?;

        Ok(RecipeListResponse {
            recipes,
            total,
            page,
            per_page,
        })
    }

    /// Creates or updates the (recipe, material) row and notifies observers.
    #[instrument(skip(self, request), fields(recipe_id = request.recipe_id, material_id = request.material_id))]
    pub async fn upsert_material(
        &self,
        request: UpsertRecipeMaterialRequest,
    ) -> Result<recipe_material::Model, ServiceError> {
        request.validate()?;

        let status = match &request.status {
            Some(raw) => DoseStatus::from_str(raw)
                .map_err(|_| ServiceError::InvalidStatus(format!("Unknown material status: {raw}")))?,
            None => DoseStatus::Pending,
        };

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        recipe::Entity::find_by_id(request.recipe_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Recipe {} not found", request.recipe_id))
            })?;
        material::Entity::find_by_id(request.material_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Material {} not found", request.material_id))
            })?;

        let existing = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(request.recipe_id))
            .filter(recipe_material::Column::MaterialId.eq(request.material_id))
            .one(&txn)
            .await?;

        let (saved, created) = match existing {
            Some(current) => {
                let mut active: recipe_material::ActiveModel = current.into();
                active.sequence = Set(request.sequence);
                active.set_point = Set(request.set_point);
                active.margin = Set(request.margin);
                active.actual = Set(request.actual);
                active.status = Set(status.as_str().to_string());
                active.bucket_id = Set(request.bucket_id);
                let updated = active.update(&txn).await.map_err(|e| {
                    ServiceError::conflict_on_unique(e, "Duplicate sequence within the recipe")
                })?;
                (updated, false)
            }
            None => {
                let inserted = recipe_material::ActiveModel {
                    recipe_id: Set(request.recipe_id),
                    material_id: Set(request.material_id),
                    sequence: Set(request.sequence),
                    set_point: Set(request.set_point),
                    margin: Set(request.margin),
                    actual: Set(request.actual),
                    status: Set(status.as_str().to_string()),
                    bucket_id: Set(request.bucket_id),
                    ..Default::default()
                }
                .insert(&txn)
                .await
                .map_err(|e| {
                    ServiceError::conflict_on_unique(e, "Duplicate sequence within the recipe")
                })?;
                (inserted, true)
            }
        };

        txn.commit().await?;

        let event = if created {
            Event::RecipeMaterialCreated {
                recipe_id: saved.recipe_id,
                material_id: saved.material_id,
                set_point: saved.set_point,
                actual: saved.actual,
                margin: saved.margin,
                status: saved.status.clone(),
                bucket_id: saved.bucket_id,
            }
        } else {
            Event::RecipeMaterialUpdated {
                recipe_id: saved.recipe_id,
                material_id: saved.material_id,
                set_point: saved.set_point,
                actual: saved.actual,
                margin: saved.margin,
                status: saved.status.clone(),
                bucket_id: saved.bucket_id,
            }
        };
        self.emit(event).await;

        info!(
            recipe_material_id = saved.recipe_material_id,
            created = created,
            "Recipe material saved"
        );
        Ok(saved)
    }

    /// Materials of one recipe in dosing order.
    #[instrument(skip(self), fields(recipe_id = recipe_id))]
    pub async fn materials_for_recipe(
        &self,
        recipe_id: i32,
    ) -> Result<Vec<recipe_material::Model>, ServiceError> {
        let db = &*self.db_pool;

        recipe::Entity::find_by_id(recipe_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Recipe {} not found", recipe_id)))?;

        let materials = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(recipe_id))
            .order_by_asc(recipe_material::Column::Sequence)
            .all(db)
            .await?;

        Ok(materials)
    }

    /// Dosed or rejected materials with recipe/material names, optionally
    /// filtered by material barcode.
    #[instrument(skip(self))]
    pub async fn dosed_materials(
        &self,
        page: u64,
        per_page: u64,
        barcode: Option<String>,
    ) -> Result<DosedMaterialsPage, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let mut query = recipe_material::Entity::find().filter(
            Condition::any()
                .add(recipe_material::Column::Status.eq(DoseStatus::Dosed.as_str()))
                .add(recipe_material::Column::Status.eq(DoseStatus::Rejected.as_str())),
        );

        if let Some(barcode) = barcode {
            let material_ids: Vec<i32> = material::Entity::find()
                .filter(material::Column::BarcodeId.eq(barcode))
                .all(db)
                .await?
                .into_iter()
                .map(|m| m.material_id)
                .collect();
            query = query.filter(recipe_material::Column::MaterialId.is_in(material_ids));
        }

        let paginator = query
            .order_by_asc(recipe_material::Column::RecipeMaterialId)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page - 1).await?;

        let recipe_ids: Vec<i32> = rows.iter().map(|m| m.recipe_id).collect();
        let material_ids: Vec<i32> = rows.iter().map(|m| m.material_id).collect();

        let recipe_names: HashMap<i32, String> = recipe::Entity::find()
            .filter(recipe::Column::RecipeId.is_in(recipe_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|r| (r.recipe_id, r.name))
            .collect();
        let material_names: HashMap<i32, String> = material::Entity::find()
            .filter(material::Column::MaterialId.is_in(material_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|m| (m.material_id, m.name))
            .collect();

        let materials = rows
            .into_iter()
            .map(|m| DosedMaterialView {
                recipe_material_id: m.recipe_material_id,
                recipe_id: m.recipe_id,
                recipe_name: recipe_names.get(&m.recipe_id).cloned().unwrap_or_default(),
                material_id: m.material_id,
                material_name: material_names
                    .get(&m.material_id)
                    .cloned()
                    .unwrap_or_default(),
                set_point: m.set_point,
                actual: m.actual,
                margin: m.margin,
                status: m.status,
            })
            .collect();

        Ok(DosedMaterialsPage {
            materials,
            total,
            page,
            per_page,
        })
    }
}
