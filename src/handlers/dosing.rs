use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use crate::services::dosing::{ActiveRecipe, DoseOutcome, DosedRecordsPage};
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

/// Runs one dosing evaluation for the recipe armed by the verified order.
pub async fn evaluate(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DoseOutcome>>, ServiceError> {
    let outcome = state.services.dosing.evaluate().await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Rejects all pending materials of a recipe without physical dosing.
pub async fn bypass(
    State(state): State<AppState>,
    Path(recipe_id): Path<i32>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let bypassed = state.services.dosing.bypass_pending(recipe_id).await?;
    Ok(Json(ApiResponse::success(json!({
        "bypassed": bypassed.len(),
        "bypassed_ids": bypassed,
    }))))
}

/// Pending materials of the active recipe, in dosing order.
pub async fn active(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ActiveRecipe>>, ServiceError> {
    match state.services.dosing.active_materials().await? {
        Some(view) => Ok(Json(ApiResponse::success(view))),
        None => Ok(Json(ApiResponse::error(
            "No verified production order found".to_string(),
        ))),
    }
}

/// Dosed-record audit history, newest first.
pub async fn records(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<DosedRecordsPage>>, ServiceError> {
    let page = state
        .services
        .dosing
        .dosed_records(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub fn dosing_routes() -> Router<AppState> {
    Router::new()
        .route("/evaluate", post(evaluate))
        .route("/recipes/:recipe_id/bypass", post(bypass))
        .route("/active", get(active))
        .route("/records", get(records))
}
