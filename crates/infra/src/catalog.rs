//! Ingredient Catalog: admin CRUD over ingredients and the Price History Tracker.
//!
//! Edits never touch stock. Opening stock is booked through the ledger, in the same
//! store call as the insert, so the cached quantity always equals the sum of ledger
//! rows. A cost change appends a price history
//! record in the same store call as the edit and publishes a price notification.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use larder_core::{IngredientId, UserId};
use larder_events::EventBus;
use larder_inventory::{
    Ingredient, IngredientDetails, IngredientUpdate, MovementContext, NewIngredient,
    PriceChanged, PriceHistoryRecord,
};

use crate::error::ServiceError;
use crate::ledger::{LedgerSettings, StockLedger};
use crate::notify::{InventoryNotification, NotificationEnvelope, Notifier};
use crate::store::{IngredientStore, StoreError};

#[derive(Debug)]
pub struct IngredientCatalog<S, B> {
    store: Arc<S>,
    ledger: StockLedger<S, B>,
    notifier: Notifier<B>,
    settings: LedgerSettings,
}

impl<S, B: Clone> Clone for IngredientCatalog<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: self.ledger.clone(),
            notifier: self.notifier.clone(),
            settings: self.settings,
        }
    }
}

impl<S, B> IngredientCatalog<S, B>
where
    S: IngredientStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(
        store: Arc<S>,
        ledger: StockLedger<S, B>,
        notifier: Notifier<B>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            settings,
        }
    }

    /// Create the ingredient with `opening_stock` booked as an `adjustment_in` row.
    /// A failed insert leaves neither the ingredient nor the row behind.
    pub fn create_ingredient(
        &self,
        new: NewIngredient,
        actor_id: UserId,
    ) -> Result<Ingredient, ServiceError> {
        let ingredient = Ingredient::create(IngredientId::new(), &new, Utc::now())?;
        let ingredient = self.ledger.open_ingredient(
            ingredient,
            new.opening_stock,
            MovementContext::by(actor_id).with_notes("opening stock"),
        )?;
        info!(
            ingredient_id = %ingredient.id_typed(),
            name = %ingredient.name(),
            unit = %ingredient.unit(),
            stock = %ingredient.current_stock(),
            "ingredient created"
        );
        Ok(ingredient)
    }

    pub fn ingredient(&self, id: IngredientId) -> Result<Ingredient, ServiceError> {
        self.store
            .load_ingredient(id)?
            .ok_or_else(|| ServiceError::not_found("ingredient", id))
    }

    pub fn ingredients(&self) -> Result<Vec<Ingredient>, ServiceError> {
        Ok(self.store.list_ingredients()?)
    }

    /// Apply an admin edit. A real cost change also appends a price history record.
    pub fn update_ingredient(
        &self,
        id: IngredientId,
        update: &IngredientUpdate,
        actor_id: UserId,
    ) -> Result<Ingredient, ServiceError> {
        let (ingredient, record) = self.edit(id, |current| {
            let plan = current.plan_update(update, actor_id, Utc::now())?;
            Ok((plan.details, plan.price_record))
        })?;

        if let Some(record) = record {
            info!(
                ingredient_id = %id,
                old_price = %record.old_price,
                new_price = %record.new_price,
                changed_by = %actor_id,
                "ingredient price changed"
            );
            self.notifier
                .publish(InventoryNotification::PriceChanged(PriceChanged::from_record(
                    &record,
                    ingredient.name(),
                )));
        }
        Ok(ingredient)
    }

    /// Hide an ingredient from new recipes and from the low-stock sweep. Rows stay,
    /// since the ledger references them.
    pub fn deactivate_ingredient(
        &self,
        id: IngredientId,
        actor_id: UserId,
    ) -> Result<Ingredient, ServiceError> {
        self.set_active(id, false, actor_id)
    }

    pub fn activate_ingredient(
        &self,
        id: IngredientId,
        actor_id: UserId,
    ) -> Result<Ingredient, ServiceError> {
        self.set_active(id, true, actor_id)
    }

    /// Price history records of one ingredient, oldest first.
    pub fn price_history(&self, id: IngredientId) -> Result<Vec<PriceHistoryRecord>, ServiceError> {
        self.ingredient(id)?;
        Ok(self.store.load_price_history(id)?)
    }

    fn set_active(
        &self,
        id: IngredientId,
        is_active: bool,
        actor_id: UserId,
    ) -> Result<Ingredient, ServiceError> {
        let (ingredient, _) = self.edit(id, |current| {
            Ok((
                IngredientDetails {
                    is_active,
                    ..current.details().clone()
                },
                None,
            ))
        })?;
        info!(ingredient_id = %id, is_active, changed_by = %actor_id, "ingredient activation changed");
        Ok(ingredient)
    }

    /// Load → plan → CAS-write loop shared by every admin edit.
    fn edit<F>(
        &self,
        id: IngredientId,
        plan: F,
    ) -> Result<(Ingredient, Option<PriceHistoryRecord>), ServiceError>
    where
        F: Fn(&Ingredient) -> Result<(IngredientDetails, Option<PriceHistoryRecord>), ServiceError>,
    {
        for attempt in 1..=self.settings.max_attempts.max(1) {
            let current = self.ingredient(id)?;
            let (details, record) = plan(&current)?;
            if &details == current.details() && record.is_none() {
                return Ok((current, None));
            }

            let now = Utc::now();
            match self
                .store
                .update_details(id, current.details(), &details, now, record.as_ref())
            {
                Ok(()) => return Ok((current.with_details(details, now), record)),
                Err(StoreError::Concurrency(reason)) => {
                    debug!(attempt, %reason, "ingredient edited concurrently; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ServiceError::ConcurrencyConflict {
            attempts: self.settings.max_attempts.max(1),
        })
    }
}
