use crate::{
    db::DbPool,
    entities::{batch, material, production_order, recipe, recipe_material},
    errors::ServiceError,
    events::{ActiveMaterial, Event, EventSender},
    services::dosing::DoseStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

/// Production order lifecycle states. At most one order is `verified`
/// system-wide; demotion targets `planned`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Planned,
    Verified,
    Rejected,
    Completed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(
        min = 1,
        max = 50,
        message = "Order number must be between 1 and 50 characters"
    ))]
    pub order_number: String,
    pub recipe_id: i32,
    pub batch_size: f64,
    pub scheduled_date: NaiveDate,
    #[validate(length(min = 1, message = "Creator is required"))]
    pub created_by: String,
    pub notes: Option<String>,
    pub barcode_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateOrderRequest {
    pub order_number: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub order_id: i32,
    pub order_number: String,
    pub recipe_id: i32,
    pub batch_size: f64,
    pub scheduled_date: NaiveDate,
    pub status: String,
    pub created_by: String,
    pub notes: Option<String>,
    pub barcode_id: Option<String>,
    pub dosing: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Service enforcing the production-order lifecycle, including the
/// single-verified-order invariant.
#[derive(Clone)]
pub struct ProductionOrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    verify_lock: Arc<Mutex<()>>,
}

impl ProductionOrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
            verify_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }

    /// Creates a new production order.
    ///
    /// Creation-time scaling: every recipe-material setpoint is multiplied by
    /// the batch size inside the creation transaction, once. The dosing
    /// display value is the per-batch setpoint total before scaling.
    #[instrument(skip(self, request), fields(order_number = %request.order_number, recipe_id = request.recipe_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        if request.batch_size <= 0.0 {
            return Err(ServiceError::ValidationError(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let materials = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(request.recipe_id))
            .all(&txn)
            .await?;
        if materials.is_empty() {
            return Err(ServiceError::ValidationError(
                "No materials found for the selected recipe".to_string(),
            ));
        }

        let total_per_batch: f64 = materials.iter().map(|m| m.set_point).sum();
        let dosing = round2(total_per_batch);

        let order = production_order::ActiveModel {
            order_number: Set(request.order_number.clone()),
            recipe_id: Set(request.recipe_id),
            batch_size: Set(request.batch_size),
            scheduled_date: Set(request.scheduled_date),
            status: Set(OrderStatus::Planned.as_str().to_string()),
            created_by: Set(request.created_by.clone()),
            notes: Set(request.notes.clone()),
            barcode_id: Set(request.barcode_id.clone()),
            dosing: Set(Some(dosing)),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            ServiceError::conflict_on_unique(e, "Duplicate entry: order number or barcode id already exists")
        })?;

        for m in &materials {
            let mut scaled: recipe_material::ActiveModel = m.clone().into();
            scaled.set_point = Set(m.set_point * request.batch_size);
            scaled.update(&txn).await?;
        }

        txn.commit().await?;

        info!(order_id = order.order_id, dosing = dosing, "Production order created");

        self.emit(Event::OrderCreated {
            order_id: order.order_id,
            recipe_id: order.recipe_id,
            order_number: order.order_number.clone(),
        })
        .await;

        Ok(self.model_to_response(order))
    }

    /// Promotes an order to `verified`, demoting any other verified order in
    /// the same transaction so there is never a window with two.
    ///
    /// The demote-and-promote read-modify-write is serialized through a
    /// single-writer lock: under a multi-connection pool at READ COMMITTED,
    /// two concurrent verifies could otherwise each read an empty "others
    /// verified" set and commit two verified orders. The partial unique
    /// index on `status = 'verified'` backstops the invariant across
    /// processes; a loser of that race gets a `Conflict`.
    ///
    /// On the `planned -> verified` edge the display dosing value is
    /// recomputed from the already-scaled rows. After commit the pending
    /// materials of the recipe are announced to observers.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn verify_order(&self, order_id: i32) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let _guard = self.verify_lock.lock().await;
        let txn = db.begin().await?;

        let order = production_order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })?;

        let others = production_order::Entity::find()
            .filter(production_order::Column::Status.eq(OrderStatus::Verified.as_str()))
            .filter(production_order::Column::OrderId.ne(order_id))
            .all(&txn)
            .await?;
        for other in others {
            let demoted_id = other.order_id;
            let mut demoted: production_order::ActiveModel = other.into();
            demoted.status = Set(OrderStatus::Planned.as_str().to_string());
            demoted.update(&txn).await?;
            info!(demoted_order_id = demoted_id, "Demoted previously verified order");
        }

        let previous_status = order.status.clone();
        let recipe_id = order.recipe_id;
        let batch_size = order.batch_size;

        let mut promoted: production_order::ActiveModel = order.into();
        promoted.status = Set(OrderStatus::Verified.as_str().to_string());

        if previous_status == OrderStatus::Planned.as_str() && batch_size > 0.0 {
            // Rows are already scaled, so dividing the total by the batch
            // size recovers the per-batch average for display.
            let materials = recipe_material::Entity::find()
                .filter(recipe_material::Column::RecipeId.eq(recipe_id))
                .all(&txn)
                .await?;
            let total: f64 = materials.iter().map(|m| m.set_point).sum();
            promoted.dosing = Set(Some(round2(total / batch_size)));
        }

        let updated = promoted.update(&txn).await.map_err(|e| {
            ServiceError::conflict_on_unique(e, "Another order was verified concurrently")
        })?;

        let pending = recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(recipe_id))
            .filter(recipe_material::Column::Status.eq(DoseStatus::Pending.as_str()))
            .order_by_asc(recipe_material::Column::Sequence)
            .find_also_related(material::Entity)
            .all(&txn)
            .await?;
        let recipe_name = recipe::Entity::find_by_id(recipe_id)
            .one(&txn)
            .await?
            .map(|r| r.name)
            .unwrap_or_default();

        txn.commit().await?;

        info!(order_id = order_id, "Production order verified");

        self.emit(Event::OrderUpdated {
            order_id: updated.order_id,
            recipe_id,
            order_number: updated.order_number.clone(),
        })
        .await;

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
        self.emit(Event::ActiveRecipeMaterials {
            recipe_id,
            recipe_name,
            materials,
        })
        .await;

        Ok(self.model_to_response(updated))
    }

    /// Marks an order rejected; it can no longer drive dosing.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn reject_order(&self, order_id: i32) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = production_order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })?;

        let mut rejected: production_order::ActiveModel = order.into();
        rejected.status = Set(OrderStatus::Rejected.as_str().to_string());
        let updated = rejected.update(db).await?;

        info!(order_id = order_id, "Production order rejected");

        self.emit(Event::OrderUpdated {
            order_id: updated.order_id,
            recipe_id: updated.recipe_id,
            order_number: updated.order_number.clone(),
        })
        .await;

        Ok(self.model_to_response(updated))
    }

    /// Updates editable order fields. Status transitions go through
    /// `verify_order` / `reject_order` instead.
    #[instrument(skip(self, request), fields(order_id = order_id))]
    pub async fn update_order(
        &self,
        order_id: i32,
        request: UpdateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = production_order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })?;

        let mut active: production_order::ActiveModel = order.into();
        if let Some(order_number) = request.order_number {
            active.order_number = Set(order_number);
        }
        if let Some(scheduled_date) = request.scheduled_date {
            active.scheduled_date = Set(scheduled_date);
        }
        if let Some(notes) = request.notes {
            active.notes = Set(Some(notes));
        }

        let updated = active.update(db).await.map_err(|e| {
            ServiceError::conflict_on_unique(e, "Duplicate entry: order number already exists")
        })?;

        info!(order_id = order_id, "Production order updated");

        self.emit(Event::OrderUpdated {
            order_id: updated.order_id,
            recipe_id: updated.recipe_id,
            order_number: updated.order_number.clone(),
        })
        .await;

        Ok(self.model_to_response(updated))
    }

    /// Deletes an order. Refused while batch records reference it, so dosing
    /// history is never orphaned.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn delete_order(&self, order_id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let order = production_order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })?;

        let dependent_batches = batch::Entity::find()
            .filter(batch::Column::OrderId.eq(order_id))
            .count(&txn)
            .await?;
        if dependent_batches > 0 {
            return Err(ServiceError::Conflict(
                "Cannot delete the order because batch data exists. Please delete the batches first."
                    .to_string(),
            ));
        }

        let recipe_id = order.recipe_id;
        let order_number = order.order_number.clone();
        order.delete(&txn).await?;

        txn.commit().await?;

        info!(order_id = order_id, "Production order deleted");

        self.emit(Event::OrderDeleted {
            order_id,
            recipe_id,
            order_number,
        })
        .await;

        Ok(())
    }

    /// Retrieves an order by id.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn get_order(&self, order_id: i32) -> Result<Option<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let order = production_order::Entity::find_by_id(order_id).one(db).await?;
        Ok(order.map(|model| self.model_to_response(model)))
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let paginator = production_order::Entity::find()
            .order_by_desc(production_order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderListResponse {
            orders: orders
                .into_iter()
                .map(|model| self.model_to_response(model))
                .collect(),
            total,
            page,
            per_page,
        })
    }

    fn model_to_response(&self, model: production_order::Model) -> OrderResponse {
        OrderResponse {
            order_id: model.order_id,
            order_number: model.order_number,
            recipe_id: model.recipe_id,
            batch_size: model.batch_size,
            scheduled_date: model.scheduled_date,
            status: model.status,
            created_by: model.created_by,
            notes: model.notes,
            barcode_id: model.barcode_id,
            dosing: model.dosing,
            created_at: model.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_statuses_are_lowercase_strings() {
        assert_eq!(OrderStatus::Planned.as_str(), "planned");
        assert_eq!(OrderStatus::Verified.as_str(), "verified");
        assert_eq!("completed".parse::<OrderStatus>(), Ok(OrderStatus::Completed));
    }

    #[test]
    fn dosing_value_rounds_to_two_decimals() {
        assert_eq!(round2(15.0049), 15.0);
        assert_eq!(round2(15.006), 15.01);
    }
}
