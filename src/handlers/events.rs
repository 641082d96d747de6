use std::convert::Infallible;

use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::events::Event;
use crate::{errors::ServiceError, ApiResponse, AppState};

/// Observer feed of all system events over SSE. Delivery is best-effort and
/// at-most-once: a lagged observer drops the oldest events and keeps going.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.event_bus.subscribe();
    let observer_id = Uuid::new_v4();
    info!(observer_id = %observer_id, "Observer connected to event stream");

    let event_stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event)
                        .unwrap_or_else(|_| "{}".to_string());
                    yield Ok(SseEvent::default().event(event.name()).data(payload));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        observer_id = %observer_id,
                        skipped,
                        "Observer lagged behind; dropping old events"
                    );
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BarcodeScanRequest {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
}

/// Ingests a scanned barcode and republishes it to observers. The scanner's
/// own wire protocol is not handled here; any producer can post.
pub async fn ingest_barcode(
    State(state): State<AppState>,
    Json(payload): Json<BarcodeScanRequest>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    payload.validate()?;

    state
        .event_sender
        .send(Event::BarcodeScanned {
            barcode: payload.barcode.clone(),
            scanned_at: Utc::now(),
        })
        .await
        .map_err(ServiceError::EventError)?;

    Ok(Json(ApiResponse::success(json!({
        "barcode": payload.barcode,
    }))))
}

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/stream", get(stream_events))
        .route("/barcode", post(ingest_barcode))
}
