use crate::{
    db::DbPool,
    entities::{dosed_material, material, production_order, recipe, recipe_material},
    errors::ServiceError,
    events::{ActiveMaterial, Event, EventSender},
    scale::WeightSource,
    services::production_orders::OrderStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Per-material dosing state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum DoseStatus {
    Pending,
    Dosed,
    Rejected,
}

impl DoseStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Result of one dosing evaluation. The tag matches the API outcome
/// vocabulary (`dosed`, `underweight`, `waiting-for-previous`, ...).
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DoseOutcome {
    Dosed {
        recipe_material_id: i32,
        material_id: i32,
        material_name: String,
        set_point: f64,
        actual: f64,
        margin: f64,
        reset_done: bool,
        total_remaining: u64,
    },
    Underweight {
        material_id: i32,
        material_name: String,
        set_point: f64,
        actual: f64,
        margin_g: f64,
        shortfall: f64,
    },
    WaitingForPrevious {
        material_id: i32,
    },
    NoPending,
    NoActiveOrder,
}

/// Pending materials of the recipe currently armed for dosing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActiveRecipe {
    pub recipe_id: i32,
    pub recipe_name: String,
    pub materials: Vec<ActiveMaterial>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DosedRecordsPage {
    pub records: Vec<dosed_material::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// The material-by-material dosing sequencer.
///
/// Evaluations are serialized per recipe: two concurrent calls for the same
/// recipe could otherwise both observe the same first pending material and
/// dose it twice. Evaluations for different recipes proceed in parallel.
#[derive(Clone)]
pub struct DosingService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    scale: Arc<dyn WeightSource>,
    recipe_locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl DosingService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        scale: Arc<dyn WeightSource>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            scale,
            recipe_locks: Arc::new(DashMap::new()),
        }
    }

    fn recipe_lock(&self, recipe_id: i32) -> Arc<Mutex<()>> {
        self.recipe_locks
            .entry(recipe_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    /// Runs one dosing evaluation against the recipe of the verified order.
    ///
    /// The active recipe is re-derived from the verified order on every call,
    /// so no in-memory cursor has to survive a restart. All no-op outcomes
    /// leave the database untouched; a successful dose commits the material
    /// update, the audit record and any batch reset as one transaction, and
    /// events are emitted only after that commit.
    #[instrument(skip(self))]
    pub async fn evaluate(&self) -> Result<DoseOutcome, ServiceError> {
        let db = &*self.db_pool;

        let Some(order) = production_order::Entity::find()
            .filter(production_order::Column::Status.eq(OrderStatus::Verified.as_str()))
            .order_by_desc(production_order::Column::CreatedAt)
            .one(db)
            .await?
        else {
            return Ok(DoseOutcome::NoActiveOrder);
        };
        let recipe_id = order.recipe_id;
        let batch_size = order.batch_size;

        // Read the device before taking the recipe lock; no row is held
        // while waiting on the scale.
        let current_weight = self.scale.current_weight_kg().await?;

        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock().await;

        let txn = db.begin().await?;

        let materials = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(recipe_id))
            .order_by_asc(recipe_material::Column::Sequence)
            .all(&txn)
            .await?;

        let Some(index) = materials
            .iter()
            .position(|m| m.status == DoseStatus::Pending.as_str())
        else {
            return Ok(DoseOutcome::NoPending);
        };

        // Strict in-order dosing: the step before the candidate must have
        // been dosed, even though steps are fetched by sequence.
        if index > 0 && materials[index - 1].status != DoseStatus::Dosed.as_str() {
            return Ok(DoseOutcome::WaitingForPrevious {
                material_id: materials[index].material_id,
            });
        }

        let candidate = materials[index].clone();
        let set_point = candidate.set_point;
        let margin_g = candidate.margin.unwrap_or(0.0);
        let lower_limit = set_point - margin_g / 1000.0;

        let material_name = material::Entity::find_by_id(candidate.material_id)
            .one(&txn)
            .await?
            .map(|m| m.name)
            .unwrap_or_else(|| format!("material {}", candidate.material_id));

        if current_weight < lower_limit {
            info!(
                recipe_id = recipe_id,
                material_id = candidate.material_id,
                current_weight = current_weight,
                lower_limit = lower_limit,
                "Current weight below acceptance threshold"
            );
            return Ok(DoseOutcome::Underweight {
                material_id: candidate.material_id,
                material_name,
                set_point,
                actual: current_weight,
                margin_g,
                shortfall: round2(lower_limit - current_weight),
            });
        }

        let remaining_before = materials
            .iter()
            .filter(|m| m.status == DoseStatus::Pending.as_str())
            .count() as u64;
        let is_final = remaining_before == 1;
        let final_margin = round2((current_weight - set_point) * 1000.0);

        let mut dosed: recipe_material::ActiveModel = candidate.clone().into();
        dosed.actual = Set(Some(current_weight));
        dosed.margin = Set(Some(final_margin));
        dosed.status = Set(DoseStatus::Dosed.as_str().to_string());
        dosed.update(&txn).await?;

        dosed_material::ActiveModel {
            recipe_id: Set(recipe_id),
            material_id: Set(candidate.material_id),
            set_point: Set(set_point),
            actual: Set(current_weight),
            margin: Set(final_margin),
            batch_size: Set(batch_size),
            dosed_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        if is_final {
            // Inverse of the scaling applied when the order was created.
            for m in &materials {
                let mut reset: recipe_material::ActiveModel = m.clone().into();
                if batch_size > 0.0 {
                    reset.set_point = Set(m.set_point / batch_size);
                }
                reset.status = Set(DoseStatus::Pending.as_str().to_string());
                reset.actual = Set(None);
                reset.margin = Set(None);
                reset.update(&txn).await?;
            }
        }

        txn.commit().await?;

        // Observers only ever see committed state.
        if is_final {
            self.emit(Event::RecipeReset {
                recipe_id,
                message: "All materials dosed and reset for next batch.".to_string(),
            })
            .await;
        }
        self.emit(Event::MaterialUpdated {
            recipe_id,
            material_id: candidate.material_id,
            material_name: material_name.clone(),
            status: DoseStatus::Dosed.as_str().to_string(),
            actual: current_weight,
            set_point,
            deviation: final_margin,
        })
        .await;

        info!(
            recipe_id = recipe_id,
            material_id = candidate.material_id,
            actual = current_weight,
            margin = final_margin,
            reset_done = is_final,
            "Material dosed"
        );

        Ok(DoseOutcome::Dosed {
            recipe_material_id: candidate.recipe_material_id,
            material_id: candidate.material_id,
            material_name,
            set_point,
            actual: current_weight,
            margin: final_margin,
            reset_done: is_final,
            total_remaining: if is_final { 0 } else { remaining_before - 1 },
        })
    }

    /// Rejects every pending material of the recipe in one transaction,
    /// skipping the recipe without physical dosing. Returns the ids of the
    /// bypassed rows.
    #[instrument(skip(self), fields(recipe_id = recipe_id))]
    pub async fn bypass_pending(&self, recipe_id: i32) -> Result<Vec<i32>, ServiceError> {
        let db = &*self.db_pool;

        let lock = self.recipe_lock(recipe_id);
        let _guard = lock.lock().await;

        let txn = db.begin().await?;

        let pending = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(recipe_id))
            .filter(recipe_material::Column::Status.eq(DoseStatus::Pending.as_str()))
            .order_by_asc(recipe_material::Column::Sequence)
            .all(&txn)
            .await?;

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut bypassed = Vec::with_capacity(pending.len());
        for m in &pending {
            let mut rejected: recipe_material::ActiveModel = m.clone().into();
            rejected.status = Set(DoseStatus::Rejected.as_str().to_string());
            rejected.update(&txn).await?;
            bypassed.push(m.recipe_material_id);
        }

        txn.commit().await?;

        for m in pending {
            self.emit(Event::RecipeMaterialUpdated {
                recipe_id,
                material_id: m.material_id,
                set_point: m.set_point,
                actual: m.actual,
                margin: m.margin,
                status: DoseStatus::Rejected.as_str().to_string(),
                bucket_id: m.bucket_id,
            })
            .await;
        }

        info!(count = bypassed.len(), "Bypassed pending materials");
        Ok(bypassed)
    }

    /// Pending materials of the recipe armed by the verified order, in
    /// dosing order. Emits `active_recipe_materials` for UI synchronization
    /// when the list is non-empty. `None` means no order is verified.
    #[instrument(skip(self))]
    pub async fn active_materials(&self) -> Result<Option<ActiveRecipe>, ServiceError> {
        let db = &*self.db_pool;

        let Some(order) = production_order::Entity::find()
            .filter(production_order::Column::Status.eq(OrderStatus::Verified.as_str()))
            .order_by_desc(production_order::Column::CreatedAt)
            .one(db)
            .await?
        else {
            return Ok(None);
        };

        let pending = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(order.recipe_id))
            .filter(recipe_material::Column::Status.eq(DoseStatus::Pending.as_str()))
            .order_by_asc(recipe_material::Column::Sequence)
            .find_also_related(material::Entity)
            .all(db)
            .await?;

        let recipe_name = recipe::Entity::find_by_id(order.recipe_id)
            .one(db)
            .await?
            .map(|r| r.name)
            .unwrap_or_default();

        let materials: Vec<ActiveMaterial> = pending
            .into_iter()
            .map(|(m, mat)| ActiveMaterial {
                material_id: m.material_id,
                material_name: mat.as_ref().map(|x| x.name.clone()).unwrap_or_default(),
                barcode: mat.and_then(|x| x.barcode_id),
                set_point: m.set_point,
                actual: m.actual,
                margin: m.margin,
                status: m.status,
                bucket_id: m.bucket_id,
            })
            .collect();

        let view = ActiveRecipe {
            recipe_id: order.recipe_id,
            recipe_name,
            materials,
        };

        if !view.materials.is_empty() {
            self.emit(Event::ActiveRecipeMaterials {
                recipe_id: view.recipe_id,
                recipe_name: view.recipe_name.clone(),
                materials: view.materials.clone(),
            })
            .await;
        }

        Ok(Some(view))
    }

    /// Dosed-record audit history, newest first.
    #[instrument(skip(self))]
    pub async fn dosed_records(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<DosedRecordsPage, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let paginator = dosed_material::Entity::find()
            .order_by_desc(dosed_material::Column::DosedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let records = paginator.fetch_page(page - 1).await?;

        Ok(DosedRecordsPage {
            records,
            total,
            page,
            per_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_tags_match_api_vocabulary() {
        let outcome = DoseOutcome::WaitingForPrevious { material_id: 2 };
        let json = serde_json::to_value(&outcome).expect("serializable");
        assert_eq!(json["outcome"], "waiting-for-previous");

        let json = serde_json::to_value(&DoseOutcome::NoActiveOrder).expect("serializable");
        assert_eq!(json["outcome"], "no-active-order");
    }

    #[test]
    fn dose_statuses_are_lowercase_strings() {
        assert_eq!(DoseStatus::Pending.as_str(), "pending");
        assert_eq!(DoseStatus::Dosed.as_str(), "dosed");
        assert_eq!(DoseStatus::Rejected.as_str(), "rejected");
        assert_eq!("rejected".parse::<DoseStatus>(), Ok(DoseStatus::Rejected));
    }
}
