use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::entities::{recipe, recipe_material};
use crate::services::recipes::{
    CreateRecipeRequest, DosedMaterialsPage, RecipeListResponse, UpsertRecipeMaterialRequest,
};
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

#[derive(Debug, Deserialize)]
pub struct DosedListQuery {
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_per_page")]
    pub per_page: u64,
    pub barcode: Option<String>,
}

pub async fn create_recipe(
    State(state): State<AppState>,
    Json(payload): Json<CreateRecipeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<recipe::Model>>), ServiceError> {
    let created = state.services.recipes.create_recipe(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn list_recipes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<RecipeListResponse>>, ServiceError> {
    let recipes = state
        .services
        .recipes
        .list_recipes(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(recipes)))
}

pub async fn materials_for_recipe(
    State(state): State<AppState>,
    Path(recipe_id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<recipe_material::Model>>>, ServiceError> {
    let materials = state
        .services
        .recipes
        .materials_for_recipe(recipe_id)
        .await?;
    Ok(Json(ApiResponse::success(materials)))
}

pub async fn upsert_material(
    State(state): State<AppState>,
    Json(payload): Json<UpsertRecipeMaterialRequest>,
) -> Result<Json<ApiResponse<recipe_material::Model>>, ServiceError> {
    let saved = state.services.recipes.upsert_material(payload).await?;
    Ok(Json(ApiResponse::success(saved)))
}

pub async fn dosed_materials(
    State(state): State<AppState>,
    Query(query): Query<DosedListQuery>,
) -> Result<Json<ApiResponse<DosedMaterialsPage>>, ServiceError> {
    let page = state
        .services
        .recipes
        .dosed_materials(query.page, query.per_page, query.barcode)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_recipe).get(list_recipes))
        .route("/materials", post(upsert_material))
        .route("/materials/dosed", get(dosed_materials))
        .route("/:recipe_id/materials", get(materials_for_recipe))
}
