use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Materials of the active recipe, as carried by the
/// `active_recipe_materials` event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActiveMaterial {
    pub material_id: i32,
    pub material_name: String,
    pub barcode: Option<String>,
    pub set_point: f64,
    pub actual: Option<f64>,
    pub margin: Option<f64>,
    pub status: String,
    pub bucket_id: Option<i32>,
}

// Define the various events that can occur in the system. The wire name of
// each variant (snake_case) is the SSE event name observers subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    // Order lifecycle
    OrderCreated {
        order_id: i32,
        recipe_id: i32,
        order_number: String,
    },
    OrderUpdated {
        order_id: i32,
        recipe_id: i32,
        order_number: String,
    },
    OrderDeleted {
        order_id: i32,
        recipe_id: i32,
        order_number: String,
    },

    // Recipe material authoring
    RecipeMaterialCreated {
        recipe_id: i32,
        material_id: i32,
        set_point: f64,
        actual: Option<f64>,
        margin: Option<f64>,
        status: String,
        bucket_id: Option<i32>,
    },
    RecipeMaterialUpdated {
        recipe_id: i32,
        material_id: i32,
        set_point: f64,
        actual: Option<f64>,
        margin: Option<f64>,
        status: String,
        bucket_id: Option<i32>,
    },

    // Dosing progress
    MaterialUpdated {
        recipe_id: i32,
        material_id: i32,
        material_name: String,
        status: String,
        actual: f64,
        set_point: f64,
        deviation: f64,
    },
    RecipeReset {
        recipe_id: i32,
        message: String,
    },
    ActiveRecipeMaterials {
        recipe_id: i32,
        recipe_name: String,
        materials: Vec<ActiveMaterial>,
    },

    // Inbound operator events
    BarcodeScanned {
        barcode: String,
        scanned_at: DateTime<Utc>,
    },
}

impl Event {
    /// Wire name of the event, e.g. `recipe_reset`.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Handle services use to publish events after their writes commit.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Fan-out side of the notifier. Each observer gets its own broadcast
/// receiver; delivery is best-effort and at-most-once, lagged observers
/// drop the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // Err means no observer is currently connected; that is fine.
        let _ = self.tx.send(event);
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// Drains the intake channel and fans events out to connected observers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, bus: EventBus) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::MaterialUpdated {
                recipe_id,
                material_id,
                status,
                ..
            } => {
                info!(
                    recipe_id = recipe_id,
                    material_id = material_id,
                    status = %status,
                    "Material dosing state changed"
                );
            }
            Event::RecipeReset { recipe_id, .. } => {
                info!(recipe_id = recipe_id, "Recipe reset for next batch");
            }
            other => {
                debug!(event = other.name(), "Forwarding event to observers");
            }
        }

        bus.publish(event);
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_snake_case() {
        let event = Event::RecipeReset {
            recipe_id: 1,
            message: "done".into(),
        };
        assert_eq!(event.name(), "recipe_reset");

        let event = Event::ActiveRecipeMaterials {
            recipe_id: 1,
            recipe_name: "premix".into(),
            materials: vec![],
        };
        assert_eq!(event.name(), "active_recipe_materials");
    }

    #[test]
    fn events_serialize_with_tag_and_payload() {
        let event = Event::OrderCreated {
            order_id: 7,
            recipe_id: 3,
            order_number: "PO-001".into(),
        };
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["event"], "order_created");
        assert_eq!(json["payload"]["order_number"], "PO-001");
    }

    #[tokio::test]
    async fn bus_delivers_to_each_observer_once() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(Event::RecipeReset {
            recipe_id: 9,
            message: "reset".into(),
        });

        assert!(matches!(
            first.recv().await,
            Ok(Event::RecipeReset { recipe_id: 9, .. })
        ));
        assert!(matches!(
            second.recv().await,
            Ok(Event::RecipeReset { recipe_id: 9, .. })
        ));
    }

    #[tokio::test]
    async fn intake_loop_fans_out() {
        let (tx, rx) = mpsc::channel(8);
        let bus = EventBus::new(8);
        let mut observer = bus.subscribe();
        tokio::spawn(process_events(rx, bus.clone()));

        EventSender::new(tx)
            .send(Event::BarcodeScanned {
                barcode: "RCP-42".into(),
                scanned_at: Utc::now(),
            })
            .await
            .expect("send");

        match observer.recv().await {
            Ok(Event::BarcodeScanned { barcode, .. }) => assert_eq!(barcode, "RCP-42"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
