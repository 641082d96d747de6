use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{post, put},
    Router,
};
use serde_json::{json, Value};

use crate::entities::batch;
use crate::services::batches::{BatchListResponse, CreateBatchRequest, UpdateBatchRequest};
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

pub async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<ApiResponse<batch::Model>>), ServiceError> {
    let created = state.services.batches.create_batch(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<BatchListResponse>>, ServiceError> {
    let batches = state
        .services
        .batches
        .list_batches(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(batches)))
}

pub async fn update_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<i32>,
    Json(payload): Json<UpdateBatchRequest>,
) -> Result<Json<ApiResponse<batch::Model>>, ServiceError> {
    let updated = state.services.batches.update_batch(batch_id, payload).await?;
    Ok(Json(ApiResponse::success(updated)))
}

pub async fn delete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<i32>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state.services.batches.delete_batch(batch_id).await?;
    Ok(Json(ApiResponse::success(json!({
        "message": format!("Batch {} deleted successfully", batch_id),
    }))))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_batch).get(list_batches))
        .route("/:id", put(update_batch).delete(delete_batch))
}
