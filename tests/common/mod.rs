use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tokio::sync::mpsc;

use microdose_api::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{material, recipe, recipe_material},
    events::{self, EventBus, EventSender},
    handlers::AppServices,
    scale::{ScaleError, WeightSource},
    services::dosing::DoseStatus,
};

/// Weight source test double that replays a scripted sequence of readings.
pub struct ScriptedScale {
    readings: Mutex<VecDeque<Result<f64, String>>>,
}

impl ScriptedScale {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_weight(&self, kg: f64) {
        self.readings.lock().unwrap().push_back(Ok(kg));
    }

    pub fn push_failure(&self, message: &str) {
        self.readings
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl WeightSource for ScriptedScale {
    async fn current_weight_kg(&self) -> Result<f64, ScaleError> {
        match self.readings.lock().unwrap().pop_front() {
            Some(Ok(kg)) => Ok(kg),
            Some(Err(message)) => Err(ScaleError::ConnectionFailed(message)),
            None => Err(ScaleError::ConnectionFailed(
                "no scripted reading queued".to_string(),
            )),
        }
    }
}

/// Test harness wiring an in-memory SQLite database, the event loop and all
/// services behind a scripted scale.
pub struct TestCtx {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub scale: Arc<ScriptedScale>,
    pub bus: EventBus,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestCtx {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        // A single pooled connection keeps every session on the same
        // in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let sender = Arc::new(EventSender::new(event_tx));
        let bus = EventBus::new(64);
        let event_task = tokio::spawn(events::process_events(event_rx, bus.clone()));

        let scale = ScriptedScale::new();
        let services = AppServices::new(db.clone(), sender, scale.clone());

        Self {
            db,
            services,
            scale,
            bus,
            _event_task: event_task,
        }
    }

    /// Seeds a recipe with one material master row and one recipe-material
    /// step per `(set_point, margin_g)` pair, in the given order. Returns the
    /// recipe id and the material ids.
    pub async fn seed_recipe(&self, code: &str, steps: &[(f64, f64)]) -> (i32, Vec<i32>) {
        let created = recipe::ActiveModel {
            name: Set(format!("recipe {code}")),
            code: Set(code.to_string()),
            description: Set(None),
            barcode_id: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed recipe");

        let mut material_ids = Vec::with_capacity(steps.len());
        for (index, (set_point, margin_g)) in steps.iter().enumerate() {
            let mat = material::ActiveModel {
                name: Set(format!("{code}-material-{}", index + 1)),
                barcode_id: Set(Some(format!("{code}-BC-{}", index + 1))),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("seed material");

            recipe_material::ActiveModel {
                recipe_id: Set(created.recipe_id),
                material_id: Set(mat.material_id),
                sequence: Set(index as i32 + 1),
                set_point: Set(*set_point),
                actual: Set(None),
                margin: Set(Some(*margin_g)),
                status: Set(DoseStatus::Pending.as_str().to_string()),
                bucket_id: Set(None),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("seed recipe material");

            material_ids.push(mat.material_id);
        }

        (created.recipe_id, material_ids)
    }

    /// Materials of a recipe in dosing order.
    pub async fn materials(&self, recipe_id: i32) -> Vec<recipe_material::Model> {
        recipe_material::Entity::find()
            .filter(recipe_material::Column::RecipeId.eq(recipe_id))
            .order_by_asc(recipe_material::Column::Sequence)
            .all(&*self.db)
            .await
            .expect("load recipe materials")
    }

    /// Directly rewrites one recipe-material status, bypassing the services.
    pub async fn force_status(&self, recipe_material_id: i32, status: DoseStatus) {
        let current = recipe_material::Entity::find_by_id(recipe_material_id)
            .one(&*self.db)
            .await
            .expect("load recipe material")
            .expect("recipe material exists");
        let mut active: recipe_material::ActiveModel = current.into();
        active.status = Set(status.as_str().to_string());
        active.update(&*self.db).await.expect("update status");
    }
}
