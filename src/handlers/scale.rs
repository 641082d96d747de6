use std::convert::Infallible;

use async_stream::stream;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use validator::Validate;

use crate::entities::scale_reading;
use crate::scale::{RawReading, ScaleSnapshot};
use crate::services::scale_log::ReadingsPage;
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery};

/// One-shot read of the raw profile, with the kg conversion applied.
pub async fn read_weight(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RawReading>>, ServiceError> {
    let reading = state.scale.read_raw().await?;
    Ok(Json(ApiResponse::success(reading)))
}

/// Full float-profile snapshot: gross, tare, net and alarm flags.
pub async fn read_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ScaleSnapshot>>, ServiceError> {
    let snapshot = state.scale.read_snapshot().await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NetWeightReading {
    pub timestamp: DateTime<Utc>,
    pub net_weight: f64,
}

/// Net weight only, decoded as a single 32-bit float from the float
/// profile. Cheaper than the full snapshot when only the vessel weight is
/// needed.
pub async fn read_net(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<NetWeightReading>>, ServiceError> {
    let net_weight = state.scale.read_net_weight().await?;
    Ok(Json(ApiResponse::success(NetWeightReading {
        timestamp: Utc::now(),
        net_weight,
    })))
}

/// Live weight stream. One device read per poll interval per connection;
/// the stream ends when the client disconnects, so each observer carries
/// its own cancellation.
pub async fn live_weight(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let scale = state.scale.clone();
    let interval = state.config.scale_poll_interval();

    let weight_stream = stream! {
        loop {
            match scale.read_raw().await {
                Ok(reading) => {
                    let payload = serde_json::to_string(&reading)
                        .unwrap_or_else(|_| "{}".to_string());
                    yield Ok(SseEvent::default().event("weight").data(payload));
                }
                Err(err) => {
                    debug!(error = %err, "Live weight read failed");
                    yield Ok(SseEvent::default().event("error").data(err.to_string()));
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    Sse::new(weight_stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SaveReadingRequest {
    pub weight: f64,
    pub error_code: i32,
    #[serde(default)]
    pub error_message: String,
}

/// Persists a specific reading manually.
pub async fn save_reading(
    State(state): State<AppState>,
    Json(payload): Json<SaveReadingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<scale_reading::Model>>), ServiceError> {
    let saved = state
        .services
        .scale_log
        .save_reading(payload.weight, payload.error_code, payload.error_message)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(saved))))
}

/// Saved readings, newest first.
pub async fn list_readings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<ReadingsPage>>, ServiceError> {
    let readings = state
        .services
        .scale_log
        .list_readings(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(readings)))
}

pub fn scale_routes() -> Router<AppState> {
    Router::new()
        .route("/weight", get(read_weight))
        .route("/net", get(read_net))
        .route("/status", get(read_status))
        .route("/live", get(live_weight))
        .route("/readings", get(list_readings).post(save_reading))
}
