use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Microdose API",
        version = "0.1.0",
        description = r#"
# Microdose Dosing Control API

Backend control service for gravimetric material dosing.

## Features

- **Dosing Sequencer**: Material-by-material tolerance-checked dosing driven by the connected scale
- **Production Orders**: Order lifecycle with a single verified order driving live dosing
- **Recipes**: Recipe and recipe-material authoring with batch-size scaling
- **Scale Integration**: Modbus/TCP register reads, raw and float profiles, live SSE weight stream
- **Events**: Server-sent event feed of all state changes for dashboards and HMIs

## Error Handling

The API uses a consistent error response format with appropriate HTTP status codes:

```json
{
  "error": "Conflict",
  "message": "Duplicate entry: order number or barcode id already exists",
  "timestamp": "2025-06-11T00:00:00Z"
}
```

## Pagination

List endpoints take `page` (default 1) and `per_page` (default 20) query parameters.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Dosing", description = "Dosing sequencer operations"),
        (name = "Production Orders", description = "Order lifecycle management"),
        (name = "Recipes", description = "Recipe and recipe-material authoring"),
        (name = "Batches", description = "Batch traceability records"),
        (name = "Scale", description = "Scale device reads and reading log"),
        (name = "Events", description = "Observer event feed")
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::scale::RawReading,
        crate::scale::ScaleSnapshot,
        crate::scale::AlarmFlags,
        crate::scale::DeviceStatus,
        crate::events::ActiveMaterial,
        crate::services::dosing::DoseOutcome,
        crate::services::dosing::ActiveRecipe,
        crate::services::dosing::DosedRecordsPage,
        crate::services::production_orders::CreateOrderRequest,
        crate::services::production_orders::UpdateOrderRequest,
        crate::services::production_orders::OrderResponse,
        crate::services::production_orders::OrderListResponse,
        crate::services::recipes::CreateRecipeRequest,
        crate::services::recipes::UpsertRecipeMaterialRequest,
        crate::services::recipes::DosedMaterialView,
        crate::services::batches::CreateBatchRequest,
        crate::services::batches::UpdateBatchRequest,
        crate::handlers::scale::SaveReadingRequest,
        crate::handlers::scale::NetWeightReading,
        crate::handlers::events::BarcodeScanRequest,
    ))
)]
pub struct ApiDoc;

/// Swagger UI mounted at `/docs`, serving the generated document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
