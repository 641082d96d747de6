use crate::{db::DbPool, entities::scale_reading, errors::ServiceError};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, QueryOrder, Set};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadingsPage {
    pub readings: Vec<scale_reading::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Append-only log of raw scale readings.
#[derive(Clone)]
pub struct ScaleLogService {
    db_pool: Arc<DbPool>,
}

impl ScaleLogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn save_reading(
        &self,
        weight: f64,
        error_code: i32,
        error_message: String,
    ) -> Result<scale_reading::Model, ServiceError> {
        let db = &*self.db_pool;

        let saved = scale_reading::ActiveModel {
            weight: Set(weight),
            error_code: Set(error_code),
            error_message: Set(error_message),
            recorded_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(reading_id = saved.reading_id, weight = weight, "Scale reading saved");
        Ok(saved)
    }

    /// Saved readings, newest first.
    #[instrument(skip(self))]
    pub async fn list_readings(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<ReadingsPage, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);

        let paginator = scale_reading::Entity::find()
            .order_by_desc(scale_reading::Column::RecordedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let readings = paginator.fetch_page(page - 1).await?;

        Ok(ReadingsPage {
            readings,
            total,
            page,
            per_page,
        })
    }
}
