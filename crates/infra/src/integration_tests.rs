//! Integration tests for the full inventory pipeline.
//!
//! Tests: Catalog → Recipe Registry → Consumption Engine → Ledger → Store → Bus
//!
//! Verifies:
//! - Low-stock alerts fire once per crossing
//! - Order consumption is all-or-nothing and idempotent per order
//! - Price history records only real changes
//! - Concurrent commits never oversell and never lose updates

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use larder_core::{IngredientId, MenuItemId, OrderId};
    use larder_events::{EventBus, InMemoryEventBus};
    use larder_inventory::{IngredientUpdate, MovementContext, MovementType};
    use larder_menu::{OrderLine, RecipeLine};
    use rust_decimal::Decimal;

    use crate::error::ServiceError;
    use crate::ledger::LedgerSettings;
    use crate::notify::{InventoryNotification, NotificationEnvelope};
    use crate::services::Larder;
    use crate::store::{IngredientStore, InMemoryInventoryStore};
    use crate::testing::{Harness, TestBus, actor, d, harness, new_ingredient};
    use crate::workers::NotificationWorker;

    fn low_stock_count(events: &[NotificationEnvelope]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e.payload(), InventoryNotification::LowStock(_)))
            .count()
    }

    fn stock(h: &Harness, id: IngredientId) -> Decimal {
        h.larder.catalog.ingredient(id).unwrap().current_stock()
    }

    /// Pizza = 0.2kg Flour + 0.1kg Cheese.
    fn pizza_setup(h: &Harness, flour_kg: &str, cheese_kg: &str) -> (IngredientId, IngredientId, MenuItemId) {
        let flour = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Flour", "kg", flour_kg, "0"), actor())
            .unwrap();
        let cheese = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Cheese", "kg", cheese_kg, "0"), actor())
            .unwrap();
        let pizza = h.larder.recipes.register_menu_item("Pizza").unwrap();
        h.larder
            .recipes
            .replace_recipe(
                pizza.id,
                &[
                    RecipeLine::new(flour.id_typed(), d("0.2")),
                    RecipeLine::new(cheese.id_typed(), d("0.1")),
                ],
            )
            .unwrap();
        (flour.id_typed(), cheese.id_typed(), pizza.id)
    }

    #[test]
    fn scenario_a_low_stock_alert_fires_once_on_crossing() {
        let h = harness();
        let subscription = h.bus.subscribe();
        let flour = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Flour", "kg", "10", "5"), actor())
            .unwrap()
            .id_typed();

        let first = h
            .larder
            .ledger
            .apply_movement(flour, d("-3"), MovementType::Usage, MovementContext::by(actor()))
            .unwrap();
        assert_eq!(first.new_quantity, d("7"));
        assert_eq!(low_stock_count(&subscription.drain()), 0);

        let second = h
            .larder
            .ledger
            .apply_movement(flour, d("-3"), MovementType::Usage, MovementContext::by(actor()))
            .unwrap();
        assert_eq!(second.new_quantity, d("4"));

        let events = subscription.drain();
        assert_eq!(low_stock_count(&events), 1);
        match events[0].payload() {
            InventoryNotification::LowStock(alert) => {
                assert_eq!(alert.ingredient_id, flour);
                assert_eq!(alert.name, "Flour");
                assert_eq!(alert.current_quantity, d("4"));
                assert_eq!(alert.threshold, d("5"));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn scenario_b_shortfall_is_reported_and_commit_refused() {
        let h = harness();
        let (flour, cheese, pizza) = pizza_setup(&h, "1.5", "5");
        let lines = [OrderLine::new(pizza, 10)];

        let report = h.larder.consumption.calculate_requirements(&lines).unwrap();
        assert!(!report.can_fulfill);
        assert_eq!(report.missing.len(), 1);
        let missing = &report.missing[0];
        assert_eq!(missing.ingredient_id, flour);
        assert_eq!(missing.required, d("2"));
        assert_eq!(missing.available, d("1.5"));
        assert_eq!(missing.shortfall, d("0.5"));
        assert_eq!(report.to_string(), "cannot fulfill: missing 0.5 kg of Flour");

        let err = h
            .larder
            .consumption
            .commit_consumption(OrderId::new(), &lines, actor())
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock { .. }));
        assert_eq!(err.shortfall(), Some(d("0.5")));

        assert_eq!(stock(&h, flour), d("1.5"));
        assert_eq!(stock(&h, cheese), d("5"));
        // Only the opening-stock rows exist.
        assert_eq!(h.larder.ledger.history(flour).unwrap().len(), 1);
        assert_eq!(h.larder.ledger.history(cheese).unwrap().len(), 1);
    }

    #[test]
    fn scenario_c_price_change_recorded_once() {
        let h = harness();
        let mut new = new_ingredient("Cheese", "kg", "1", "0");
        new.cost_per_unit = Some(d("1000"));
        let cheese = h.larder.catalog.create_ingredient(new, actor()).unwrap();
        let to_1200 = IngredientUpdate {
            cost_per_unit: Some(Some(d("1200"))),
            ..IngredientUpdate::default()
        };

        h.larder
            .catalog
            .update_ingredient(cheese.id_typed(), &to_1200, actor())
            .unwrap();
        h.larder
            .catalog
            .update_ingredient(cheese.id_typed(), &to_1200, actor())
            .unwrap();

        let history = h.larder.catalog.price_history(cheese.id_typed()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!((history[0].old_price, history[0].new_price), (d("1000"), d("1200")));
    }

    #[test]
    fn scenario_d_concurrent_orders_for_the_last_unit() {
        let h = harness();
        let milk = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Milk", "l", "1", "0"), actor())
            .unwrap()
            .id_typed();
        let latte = h.larder.recipes.register_menu_item("Latte").unwrap();
        h.larder
            .recipes
            .replace_recipe(latte.id, &[RecipeLine::new(milk, d("1"))])
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let results: Vec<Result<_, ServiceError>> = (0..2)
            .map(|_| {
                let engine = h.larder.consumption.clone();
                let barrier = barrier.clone();
                let menu_item = latte.id;
                thread::spawn(move || {
                    barrier.wait();
                    engine.commit_consumption(
                        OrderId::new(),
                        &[OrderLine::new(menu_item, 1)],
                        actor(),
                    )
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::InsufficientStock { .. })))
            .count();
        assert_eq!((successes, insufficient), (1, 1));
        assert_eq!(stock(&h, milk), d("0"));
        assert!(!h.larder.recipes.menu_item(latte.id).unwrap().is_available);
    }

    #[test]
    fn failed_commit_leaves_no_partial_deduction() {
        let h = harness();
        // Flour is fine, Cheese (second ingredient) is short.
        let (flour, cheese, pizza) = pizza_setup(&h, "10", "0.3");
        let order_id = OrderId::new();

        let err = h
            .larder
            .consumption
            .commit_consumption(order_id, &[OrderLine::new(pizza, 5)], actor())
            .unwrap_err();

        assert!(matches!(err, ServiceError::InsufficientStock { ref name, .. } if name == "Cheese"));
        assert_eq!(stock(&h, flour), d("10"));
        assert_eq!(stock(&h, cheese), d("0.3"));
        assert!(h.larder.ledger.order_movements(order_id).unwrap().is_empty());
    }

    #[test]
    fn an_order_is_consumed_at_most_once() {
        let h = harness();
        let (flour, _, pizza) = pizza_setup(&h, "10", "10");
        let order_id = OrderId::new();
        let lines = [OrderLine::new(pizza, 2)];

        h.larder
            .consumption
            .commit_consumption(order_id, &lines, actor())
            .unwrap();
        let err = h
            .larder
            .consumption
            .commit_consumption(order_id, &lines, actor())
            .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(stock(&h, flour), d("9.6"));
        assert_eq!(h.larder.ledger.order_movements(order_id).unwrap().len(), 2);
    }

    #[test]
    fn consumption_cascades_to_items_sharing_an_ingredient() {
        let h = harness();
        let (flour, _, pizza) = pizza_setup(&h, "1", "10");
        let bread = h.larder.recipes.register_menu_item("Bread").unwrap();
        h.larder
            .recipes
            .replace_recipe(bread.id, &[RecipeLine::new(flour, d("0.5"))])
            .unwrap();
        assert!(h.larder.recipes.menu_item(bread.id).unwrap().is_available);

        // 3 pizzas take 0.6kg flour, leaving 0.4kg: not enough for one bread.
        let receipt = h
            .larder
            .consumption
            .commit_consumption(OrderId::new(), &[OrderLine::new(pizza, 3)], actor())
            .unwrap();

        let bread_change = receipt
            .availability_changes
            .iter()
            .find(|c| c.menu_item_id == bread.id)
            .unwrap();
        assert!(bread_change.changed());
        assert!(!bread_change.current_status);
        assert!(!h.larder.recipes.menu_item(bread.id).unwrap().is_available);
        assert!(h.larder.recipes.menu_item(pizza).unwrap().is_available);
    }

    #[test]
    fn recipe_edits_do_not_rewrite_past_consumption() {
        let h = harness();
        let (flour, _, pizza) = pizza_setup(&h, "10", "10");
        let order_id = OrderId::new();
        h.larder
            .consumption
            .commit_consumption(order_id, &[OrderLine::new(pizza, 1)], actor())
            .unwrap();

        h.larder
            .recipes
            .replace_recipe(pizza, &[RecipeLine::new(flour, d("0.9"))])
            .unwrap();

        let rows = h.larder.ledger.order_movements(order_id).unwrap();
        let flour_row = rows.iter().find(|r| r.ingredient_id == flour).unwrap();
        assert_eq!(flour_row.quantity, d("-0.2"));
    }

    #[test]
    fn many_concurrent_orders_never_oversell() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let bus: TestBus = Arc::new(InMemoryEventBus::new());
        // Every CAS loss means another commit landed, so 1000 attempts cannot run out.
        let larder = Larder::new(store.clone(), bus, LedgerSettings { max_attempts: 1000 });
        let sugar = larder
            .catalog
            .create_ingredient(new_ingredient("Sugar", "kg", "50", "10"), actor())
            .unwrap()
            .id_typed();
        let cake = larder.recipes.register_menu_item("Cake").unwrap();
        larder
            .recipes
            .replace_recipe(cake.id, &[RecipeLine::new(sugar, d("1"))])
            .unwrap();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = larder.consumption.clone();
                let outcomes = outcomes.clone();
                let barrier = barrier.clone();
                let menu_item = cake.id;
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..10 {
                        let result = engine.commit_consumption(
                            OrderId::new(),
                            &[OrderLine::new(menu_item, 1)],
                            actor(),
                        );
                        outcomes.lock().unwrap().push(result.map(|_| ()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let outcomes = outcomes.lock().unwrap();
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        let insufficient = outcomes
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::InsufficientStock { .. })))
            .count();
        assert_eq!(successes, 50);
        assert_eq!(insufficient, 30);

        let ingredient = store.load_ingredient(sugar).unwrap().unwrap();
        assert_eq!(ingredient.current_stock(), d("0"));
        let report = larder.ledger.reconcile(sugar).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.rows, 51);
    }

    #[test]
    fn notifications_reach_a_worker_subscriber() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = NotificationWorker::spawn("test-notifications", &h.bus, move |env: NotificationEnvelope| {
            sink.lock().unwrap().push(env.event_type().to_string());
            Ok::<(), ()>(())
        });

        let flour = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Flour", "kg", "6", "5"), actor())
            .unwrap()
            .id_typed();
        h.larder
            .ledger
            .apply_movement(flour, d("-2"), MovementType::Waste, MovementContext::by(actor()))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        worker.shutdown();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["inventory.ingredient.low_stock".to_string()]
        );
    }

    #[test]
    fn reconcile_all_detects_and_heals_out_of_band_edits() {
        let h = harness();
        let (flour, cheese, _) = pizza_setup(&h, "4", "2");
        h.store.corrupt_cached_stock(cheese, d("7"));

        let reports = h.larder.ledger.reconcile_all().unwrap();
        let drifted: Vec<_> = reports.iter().filter(|r| r.repaired).collect();
        assert_eq!(drifted.len(), 1);
        assert_eq!(drifted[0].ingredient_id, cheese);
        assert_eq!(stock(&h, cheese), d("2"));
        assert_eq!(stock(&h, flour), d("4"));
    }
}
