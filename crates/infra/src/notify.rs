//! Outbound notifications (low stock, price change, availability flip).
//!
//! Notifications are published only after the write they describe has committed.
//! Delivery is best-effort: a failed publish is logged and never surfaces to the
//! caller whose write already succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use larder_events::{Event, EventBus, EventEnvelope};
use larder_inventory::{LowStockAlert, PriceChanged};
use larder_menu::AvailabilityChanged;

/// Everything the inventory core tells the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum InventoryNotification {
    LowStock(LowStockAlert),
    PriceChanged(PriceChanged),
    AvailabilityChanged(AvailabilityChanged),
}

impl Event for InventoryNotification {
    fn event_type(&self) -> &'static str {
        match self {
            Self::LowStock(_) => "inventory.ingredient.low_stock",
            Self::PriceChanged(_) => "inventory.ingredient.price_changed",
            Self::AvailabilityChanged(_) => "menu.item.availability_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::LowStock(alert) => alert.occurred_at,
            Self::PriceChanged(change) => change.occurred_at,
            Self::AvailabilityChanged(change) => change.occurred_at,
        }
    }
}

pub type NotificationEnvelope = EventEnvelope<InventoryNotification>;

/// Thin publishing wrapper shared by every service.
#[derive(Debug, Clone)]
pub struct Notifier<B> {
    bus: B,
}

impl<B> Notifier<B>
where
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn publish(&self, notification: InventoryNotification) {
        let event_type = notification.event_type();
        if let Err(err) = self.bus.publish(EventEnvelope::wrap(notification)) {
            warn!(event_type, error = ?err, "notification publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use larder_core::IngredientId;
    use larder_events::InMemoryEventBus;
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn published_notifications_are_enveloped() {
        let bus = Arc::new(InMemoryEventBus::<NotificationEnvelope>::new());
        let subscription = bus.subscribe();
        let notifier = Notifier::new(bus.clone());

        notifier.publish(InventoryNotification::LowStock(LowStockAlert {
            ingredient_id: IngredientId::new(),
            name: "Flour".to_string(),
            unit: "kg".to_string(),
            current_quantity: Decimal::from(4),
            threshold: Decimal::from(5),
            occurred_at: Utc::now(),
        }));

        let received = subscription.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type(), "inventory.ingredient.low_stock");
        assert_eq!(received[0].event_version(), 1);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(InventoryNotification::PriceChanged(PriceChanged {
            ingredient_id: IngredientId::new(),
            name: "Cheese".to_string(),
            old_price: Decimal::from(1000),
            new_price: Decimal::from(1200),
            changed_by: larder_core::UserId::new(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        assert_eq!(json["kind"], "price_changed");
        assert_eq!(json["payload"]["name"], "Cheese");
    }
}
