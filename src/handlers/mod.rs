pub mod batches;
pub mod dosing;
pub mod events;
pub mod production_orders;
pub mod recipes;
pub mod scale;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::scale::WeightSource;
use crate::services::{
    batches::BatchService, dosing::DosingService, production_orders::ProductionOrderService,
    recipes::RecipeService, scale_log::ScaleLogService,
};

/// Aggregates the services used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<ProductionOrderService>,
    pub dosing: Arc<DosingService>,
    pub recipes: Arc<RecipeService>,
    pub batches: Arc<BatchService>,
    pub scale_log: Arc<ScaleLogService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        scale: Arc<dyn WeightSource>,
    ) -> Self {
        Self {
            orders: Arc::new(ProductionOrderService::new(
                db.clone(),
                event_sender.clone(),
            )),
            dosing: Arc::new(DosingService::new(db.clone(), event_sender.clone(), scale)),
            recipes: Arc::new(RecipeService::new(db.clone(), event_sender.clone())),
            batches: Arc::new(BatchService::new(db.clone())),
            scale_log: Arc::new(ScaleLogService::new(db)),
        }
    }
}
