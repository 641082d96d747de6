use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use crate::services::production_orders::{
    CreateOrderRequest, OrderListResponse, OrderResponse, UpdateOrderRequest,
};
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Production order {} not found", order_id)))?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_order(order_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Promotes the order to `verified`; any other verified order is demoted in
/// the same transaction.
pub async fn verify_order(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.verify_order(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn reject_order(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.reject_order(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    state.services.orders.delete_order(order_id).await?;
    Ok(Json(ApiResponse::success(json!({
        "message": format!("Production order {} deleted successfully", order_id),
    }))))
}

pub fn production_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order).put(update_order).delete(delete_order))
        .route("/:id/verify", post(verify_order))
        .route("/:id/reject", post(reject_order))
}
