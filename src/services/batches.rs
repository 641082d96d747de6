use crate::{
    db::DbPool,
    entities::{batch, production_order},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBatchRequest {
    #[validate(length(min = 1, max = 50, message = "Batch number is required"))]
    pub batch_number: String,
    pub order_id: i32,
    #[validate(length(min = 1, message = "Operator is required"))]
    pub operator: String,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateBatchRequest {
    pub batch_number: Option<String>,
    pub status: Option<String>,
    pub operator: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchListResponse {
    pub batches: Vec<batch::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Traceability records of individual dosing runs.
#[derive(Clone)]
pub struct BatchService {
    db_pool: Arc<DbPool>,
}

impl BatchService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(batch_number = %request.batch_number, order_id = request.order_id))]
    pub async fn create_batch(
        &self,
        request: CreateBatchRequest,
    ) -> Result<batch::Model, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;

        production_order::Entity::find_by_id(request.order_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Order with ID {} does not exist",
                    request.order_id
                ))
            })?;

        let created = batch::ActiveModel {
            batch_number: Set(request.batch_number.clone()),
            order_id: Set(request.order_id),
            operator: Set(request.operator),
            status: Set(request.status.unwrap_or_else(|| "pending".to_string())),
            notes: Set(request.notes),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| {
            ServiceError::conflict_on_unique(
                e,
                format!("Batch number {} already exists", request.batch_number),
            )
        })?;

        info!(batch_id = created.batch_id, "Batch created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn list_batches(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<BatchListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let paginator = batch::Entity::find()
            .order_by_desc(batch::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let batches = paginator.fetch_page(page - 1).await?;

        Ok(BatchListResponse {
            batches,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self, request), fields(batch_id = batch_id))]
    pub async fn update_batch(
        &self,
        batch_id: i32,
        request: UpdateBatchRequest,
    ) -> Result<batch::Model, ServiceError> {
        let db = &*self.db_pool;

        let current = batch::Entity::find_by_id(batch_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        let mut active: batch::ActiveModel = current.into();
        if let Some(batch_number) = request.batch_number {
            active.batch_number = Set(batch_number);
        }
        if let Some(status) = request.status {
            active.status = Set(status);
        }
        if let Some(operator) = request.operator {
            active.operator = Set(operator);
        }
        if let Some(notes) = request.notes {
            active.notes = Set(Some(notes));
        }

        let updated = active.update(db).await.map_err(|e| {
            ServiceError::conflict_on_unique(e, "Duplicate entry: batch number already exists")
        })?;

        info!(batch_id = batch_id, "Batch updated");
        Ok(updated)
    }

    #[instrument(skip(self), fields(batch_id = batch_id))]
    pub async fn delete_batch(&self, batch_id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let current = batch::Entity::find_by_id(batch_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        current.delete(db).await?;

        info!(batch_id = batch_id, "Batch deleted");
        Ok(())
    }
}
