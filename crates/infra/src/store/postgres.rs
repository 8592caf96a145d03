//! Postgres-backed inventory store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | Reused idempotency key, duplicate id or recipe row |
//! | Database (check constraint violation) | `23514` | `Concurrency` | Stock would go negative under a racing writer |
//! | Database (foreign key violation) | `23503` | `NotFound` | Row references a missing ingredient/menu item |
//! | Database (serialization failure) | `40001` | `Concurrency` | Snapshot conflict |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! ## Thread Safety
//!
//! `PostgresInventoryStore` is `Send + Sync`. The traits are synchronous, so the store
//! owns a small tokio runtime and blocks on it; callers must not be tokio tasks
//! themselves.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::instrument;
use uuid::Uuid;

use larder_core::{IngredientId, MenuItemId, OrderId, PriceRecordId, TransactionId, UserId};
use larder_inventory::{
    Ingredient, IngredientDetails, MovementType, PriceHistoryRecord, StockTransaction,
};
use larder_menu::{MenuItem, RecipeIngredient};

use super::traits::{IngredientStore, RecipeStore, StockBatch, StoreError};

/// Schema applied by [`PostgresInventoryStore::migrate`]. Idempotent.
///
/// Quantities are unconstrained `NUMERIC` so the CAS comparison on `current_stock` sees
/// exactly the decimal the ledger decided on.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ingredients (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    unit TEXT NOT NULL,
    current_stock NUMERIC NOT NULL DEFAULT 0 CHECK (current_stock >= 0),
    min_stock_level NUMERIC NOT NULL DEFAULT 0 CHECK (min_stock_level >= 0),
    cost_per_unit NUMERIC CHECK (cost_per_unit >= 0),
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS stock_transactions (
    seq BIGSERIAL PRIMARY KEY,
    id UUID NOT NULL UNIQUE,
    ingredient_id UUID NOT NULL REFERENCES ingredients (id),
    movement_type TEXT NOT NULL,
    quantity NUMERIC NOT NULL CHECK (quantity <> 0),
    previous_quantity NUMERIC NOT NULL,
    new_quantity NUMERIC NOT NULL CHECK (new_quantity >= 0),
    unit_price NUMERIC,
    occurred_at TIMESTAMPTZ NOT NULL,
    actor_id UUID NOT NULL,
    notes TEXT,
    order_id UUID,
    menu_item_id UUID
);
CREATE INDEX IF NOT EXISTS stock_transactions_ingredient_idx
    ON stock_transactions (ingredient_id, seq);
CREATE INDEX IF NOT EXISTS stock_transactions_order_idx
    ON stock_transactions (order_id) WHERE order_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS ledger_batches (
    idempotency_key TEXT PRIMARY KEY,
    committed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS price_history (
    seq BIGSERIAL PRIMARY KEY,
    id UUID NOT NULL UNIQUE,
    ingredient_id UUID NOT NULL REFERENCES ingredients (id),
    old_price NUMERIC NOT NULL,
    new_price NUMERIC NOT NULL,
    change_date TIMESTAMPTZ NOT NULL,
    change_reason TEXT,
    changed_by UUID NOT NULL
);

CREATE TABLE IF NOT EXISTS menu_items (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    is_available BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS recipe_ingredients (
    menu_item_id UUID NOT NULL REFERENCES menu_items (id),
    ingredient_id UUID NOT NULL REFERENCES ingredients (id),
    position INTEGER NOT NULL,
    quantity NUMERIC NOT NULL CHECK (quantity > 0),
    unit TEXT NOT NULL,
    notes TEXT,
    PRIMARY KEY (menu_item_id, ingredient_id)
);
CREATE INDEX IF NOT EXISTS recipe_ingredients_ingredient_idx
    ON recipe_ingredients (ingredient_id);
"#;

const INGREDIENT_COLUMNS: &str = "id, name, unit, current_stock, min_stock_level, \
     cost_per_unit, is_active, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, ingredient_id, movement_type, quantity, \
     previous_quantity, new_quantity, unit_price, occurred_at, actor_id, notes, order_id, \
     menu_item_id";

/// Postgres-backed [`IngredientStore`] + [`RecipeStore`].
///
/// Every multi-row write runs in one SQL transaction. Stock writes are
/// `UPDATE ... WHERE current_stock = $previous`; a zero row count aborts the whole batch
/// with `StoreError::Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PostgresInventoryStore {
    /// Build the runtime and connect the pool.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("larder-pg")
            .enable_all()
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to build tokio runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            sqlx::raw_sql(SCHEMA)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
            Ok(())
        })
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn commit(
        &self,
        tx: Transaction<'static, Postgres>,
        operation: &str,
    ) -> Result<(), StoreError> {
        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
    }

    async fn insert_transaction_row(
        tx: &mut Transaction<'static, Postgres>,
        row: &StockTransaction,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_transactions (
                id, ingredient_id, movement_type, quantity, previous_quantity,
                new_quantity, unit_price, occurred_at, actor_id, notes, order_id, menu_item_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(*row.id.as_uuid())
        .bind(*row.ingredient_id.as_uuid())
        .bind(row.movement_type.as_str())
        .bind(row.quantity)
        .bind(row.previous_quantity)
        .bind(row.new_quantity)
        .bind(row.unit_price)
        .bind(row.occurred_at)
        .bind(*row.actor_id.as_uuid())
        .bind(row.notes.as_deref())
        .bind(row.order_id.map(Uuid::from))
        .bind(row.menu_item_id.map(Uuid::from))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("commit_stock", e))?;
        Ok(())
    }
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

fn decode_error(operation: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row in {operation}: {err}"))
}

fn ingredient_from_row(row: &PgRow) -> Result<Ingredient, StoreError> {
    let get = |e| decode_error("ingredient", e);
    let id: Uuid = row.try_get("id").map_err(get)?;
    let details = IngredientDetails {
        name: row.try_get("name").map_err(get)?,
        unit: row.try_get("unit").map_err(get)?,
        min_stock_level: row.try_get("min_stock_level").map_err(get)?,
        cost_per_unit: row.try_get("cost_per_unit").map_err(get)?,
        is_active: row.try_get("is_active").map_err(get)?,
    };
    Ok(Ingredient::restore(
        IngredientId::from_uuid(id),
        details,
        row.try_get("current_stock").map_err(get)?,
        row.try_get("created_at").map_err(get)?,
        row.try_get("updated_at").map_err(get)?,
    ))
}

fn transaction_from_row(row: &PgRow) -> Result<StockTransaction, StoreError> {
    let get = |e| decode_error("stock_transaction", e);
    let movement_type: String = row.try_get("movement_type").map_err(get)?;
    let movement_type: MovementType = movement_type
        .parse()
        .map_err(|e| StoreError::Backend(format!("corrupt stock_transactions row: {e}")))?;
    let order_id: Option<Uuid> = row.try_get("order_id").map_err(get)?;
    let menu_item_id: Option<Uuid> = row.try_get("menu_item_id").map_err(get)?;
    Ok(StockTransaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(get)?),
        ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id").map_err(get)?),
        movement_type,
        quantity: row.try_get("quantity").map_err(get)?,
        previous_quantity: row.try_get("previous_quantity").map_err(get)?,
        new_quantity: row.try_get("new_quantity").map_err(get)?,
        unit_price: row.try_get("unit_price").map_err(get)?,
        occurred_at: row.try_get("occurred_at").map_err(get)?,
        actor_id: UserId::from_uuid(row.try_get("actor_id").map_err(get)?),
        notes: row.try_get("notes").map_err(get)?,
        order_id: order_id.map(OrderId::from_uuid),
        menu_item_id: menu_item_id.map(MenuItemId::from_uuid),
    })
}

fn price_record_from_row(row: &PgRow) -> Result<PriceHistoryRecord, StoreError> {
    let get = |e| decode_error("price_history", e);
    Ok(PriceHistoryRecord {
        id: PriceRecordId::from_uuid(row.try_get("id").map_err(get)?),
        ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id").map_err(get)?),
        old_price: row.try_get("old_price").map_err(get)?,
        new_price: row.try_get("new_price").map_err(get)?,
        change_date: row.try_get("change_date").map_err(get)?,
        change_reason: row.try_get("change_reason").map_err(get)?,
        changed_by: UserId::from_uuid(row.try_get("changed_by").map_err(get)?),
    })
}

fn menu_item_from_row(row: &PgRow) -> Result<MenuItem, StoreError> {
    let get = |e| decode_error("menu_item", e);
    Ok(MenuItem {
        id: MenuItemId::from_uuid(row.try_get("id").map_err(get)?),
        name: row.try_get("name").map_err(get)?,
        is_available: row.try_get("is_available").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn recipe_row_from_row(row: &PgRow) -> Result<RecipeIngredient, StoreError> {
    let get = |e| decode_error("recipe_ingredient", e);
    Ok(RecipeIngredient {
        menu_item_id: MenuItemId::from_uuid(row.try_get("menu_item_id").map_err(get)?),
        ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id").map_err(get)?),
        quantity: row.try_get("quantity").map_err(get)?,
        unit: row.try_get("unit").map_err(get)?,
        notes: row.try_get("notes").map_err(get)?,
    })
}

impl IngredientStore for PostgresInventoryStore {
    #[instrument(
        skip(self, ingredient, opening),
        fields(ingredient_id = %ingredient.id_typed(), opening = opening.is_some()),
        err
    )]
    fn insert_ingredient(
        &self,
        ingredient: &Ingredient,
        opening: Option<&StockTransaction>,
    ) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            let mut tx = self.begin("insert_ingredient").await?;
            sqlx::query(
                r#"
                INSERT INTO ingredients (
                    id, name, unit, current_stock, min_stock_level, cost_per_unit,
                    is_active, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(*ingredient.id_typed().as_uuid())
            .bind(ingredient.name())
            .bind(ingredient.unit())
            .bind(ingredient.current_stock())
            .bind(ingredient.min_stock_level())
            .bind(ingredient.cost_per_unit())
            .bind(ingredient.is_active())
            .bind(ingredient.created_at())
            .bind(ingredient.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_ingredient", e))?;

            if let Some(row) = opening {
                Self::insert_transaction_row(&mut tx, row).await?;
            }

            self.commit(tx, "insert_ingredient").await
        })
    }

    #[instrument(skip(self), fields(ingredient_id = %id), err)]
    fn load_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, StoreError> {
        self.runtime.block_on(async {
            let row = sqlx::query(&format!(
                "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_ingredient", e))?;
            row.as_ref().map(ingredient_from_row).transpose()
        })
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    fn load_ingredients(&self, ids: &[IngredientId]) -> Result<Vec<Ingredient>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(&format!(
                "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE id = ANY($1)"
            ))
            .bind(uuids(ids))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_ingredients", e))?;
            rows.iter().map(ingredient_from_row).collect()
        })
    }

    #[instrument(skip(self), err)]
    fn list_ingredients(&self) -> Result<Vec<Ingredient>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(&format!(
                "SELECT {INGREDIENT_COLUMNS} FROM ingredients ORDER BY name, id"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_ingredients", e))?;
            rows.iter().map(ingredient_from_row).collect()
        })
    }

    #[instrument(skip(self, expected, details, price_record), fields(ingredient_id = %id), err)]
    fn update_details(
        &self,
        id: IngredientId,
        expected: &IngredientDetails,
        details: &IngredientDetails,
        updated_at: DateTime<Utc>,
        price_record: Option<&PriceHistoryRecord>,
    ) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            let mut tx = self.begin("update_details").await?;

            let result = sqlx::query(
                r#"
                UPDATE ingredients
                SET name = $2, min_stock_level = $3, cost_per_unit = $4, is_active = $5,
                    updated_at = $6
                WHERE id = $1
                  AND name = $7 AND unit = $8 AND min_stock_level = $9
                  AND cost_per_unit IS NOT DISTINCT FROM $10 AND is_active = $11
                "#,
            )
            .bind(*id.as_uuid())
            .bind(&details.name)
            .bind(details.min_stock_level)
            .bind(details.cost_per_unit)
            .bind(details.is_active)
            .bind(updated_at)
            .bind(&expected.name)
            .bind(&expected.unit)
            .bind(expected.min_stock_level)
            .bind(expected.cost_per_unit)
            .bind(expected.is_active)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_details", e))?;

            if result.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM ingredients WHERE id = $1")
                    .bind(*id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("update_details", e))?
                    .is_some();
                return Err(if exists {
                    StoreError::Concurrency(format!("ingredient {id} details changed concurrently"))
                } else {
                    StoreError::NotFound {
                        entity: "ingredient",
                        id: id.to_string(),
                    }
                });
            }

            if let Some(record) = price_record {
                sqlx::query(
                    r#"
                    INSERT INTO price_history (
                        id, ingredient_id, old_price, new_price, change_date,
                        change_reason, changed_by
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(*record.id.as_uuid())
                .bind(*record.ingredient_id.as_uuid())
                .bind(record.old_price)
                .bind(record.new_price)
                .bind(record.change_date)
                .bind(record.change_reason.as_deref())
                .bind(*record.changed_by.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_details", e))?;
            }

            self.commit(tx, "update_details").await
        })
    }

    #[instrument(
        skip(self, batch),
        fields(rows = batch.transactions.len(), idempotency_key = ?batch.idempotency_key),
        err
    )]
    fn commit_stock(&self, batch: &StockBatch) -> Result<(), StoreError> {
        if batch.transactions.is_empty() {
            return Ok(());
        }
        self.runtime.block_on(async {
            let mut tx = self.begin("commit_stock").await?;

            if let Some(key) = &batch.idempotency_key {
                sqlx::query("INSERT INTO ledger_batches (idempotency_key) VALUES ($1)")
                    .bind(key)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("commit_stock", e))?;
            }

            for row in lock_order(&batch.transactions) {
                let result = sqlx::query(
                    r#"
                    UPDATE ingredients
                    SET current_stock = $3, updated_at = $4
                    WHERE id = $1 AND current_stock = $2
                    "#,
                )
                .bind(*row.ingredient_id.as_uuid())
                .bind(row.previous_quantity)
                .bind(row.new_quantity)
                .bind(row.occurred_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("commit_stock", e))?;

                // Dropping `tx` without commit rolls back the rows written so far.
                if result.rows_affected() == 0 {
                    return Err(StoreError::Concurrency(format!(
                        "ingredient {}: stock is no longer {}",
                        row.ingredient_id, row.previous_quantity
                    )));
                }

                Self::insert_transaction_row(&mut tx, row).await?;
            }

            self.commit(tx, "commit_stock").await
        })
    }

    #[instrument(skip(self), fields(ingredient_id = %id), err)]
    fn load_transactions(&self, id: IngredientId) -> Result<Vec<StockTransaction>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM stock_transactions \
                 WHERE ingredient_id = $1 ORDER BY seq ASC"
            ))
            .bind(*id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_transactions", e))?;
            rows.iter().map(transaction_from_row).collect()
        })
    }

    #[instrument(skip(self), fields(ingredient_id = %id), err)]
    fn load_with_history(
        &self,
        id: IngredientId,
    ) -> Result<Option<(Ingredient, Vec<StockTransaction>)>, StoreError> {
        self.runtime.block_on(async {
            let mut tx = self.begin("load_with_history").await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_with_history", e))?;

            let Some(row) = sqlx::query(&format!(
                "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_with_history", e))?
            else {
                return Ok(None);
            };
            let ingredient = ingredient_from_row(&row)?;

            let rows = sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM stock_transactions \
                 WHERE ingredient_id = $1 ORDER BY seq ASC"
            ))
            .bind(*id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_with_history", e))?;
            let history = rows
                .iter()
                .map(transaction_from_row)
                .collect::<Result<Vec<_>, _>>()?;

            self.commit(tx, "load_with_history").await?;
            Ok(Some((ingredient, history)))
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    fn load_order_transactions(&self, order_id: OrderId) -> Result<Vec<StockTransaction>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM stock_transactions \
                 WHERE order_id = $1 ORDER BY seq ASC"
            ))
            .bind(*order_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_order_transactions", e))?;
            rows.iter().map(transaction_from_row).collect()
        })
    }

    #[instrument(skip(self), fields(ingredient_id = %id), err)]
    fn repair_stock(
        &self,
        id: IngredientId,
        expected: Decimal,
        replayed: Decimal,
    ) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            let result = sqlx::query(
                "UPDATE ingredients SET current_stock = $3 WHERE id = $1 AND current_stock = $2",
            )
            .bind(*id.as_uuid())
            .bind(expected)
            .bind(replayed)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("repair_stock", e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Concurrency(format!(
                    "ingredient {id}: stock is no longer {expected}"
                )));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(ingredient_id = %id), err)]
    fn load_price_history(&self, id: IngredientId) -> Result<Vec<PriceHistoryRecord>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT id, ingredient_id, old_price, new_price, change_date, change_reason,
                       changed_by
                FROM price_history
                WHERE ingredient_id = $1
                ORDER BY seq ASC
                "#,
            )
            .bind(*id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_price_history", e))?;
            rows.iter().map(price_record_from_row).collect()
        })
    }
}

impl RecipeStore for PostgresInventoryStore {
    #[instrument(skip(self, item), fields(menu_item_id = %item.id), err)]
    fn insert_menu_item(&self, item: &MenuItem) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            sqlx::query(
                "INSERT INTO menu_items (id, name, is_available, created_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(*item.id.as_uuid())
            .bind(&item.name)
            .bind(item.is_available)
            .bind(item.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_menu_item", e))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(menu_item_id = %id), err)]
    fn load_menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, StoreError> {
        self.runtime.block_on(async {
            let row = sqlx::query(
                "SELECT id, name, is_available, created_at FROM menu_items WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_menu_item", e))?;
            row.as_ref().map(menu_item_from_row).transpose()
        })
    }

    #[instrument(skip(self), err)]
    fn list_menu_items(&self) -> Result<Vec<MenuItem>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(
                "SELECT id, name, is_available, created_at FROM menu_items ORDER BY name, id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_menu_items", e))?;
            rows.iter().map(menu_item_from_row).collect()
        })
    }

    #[instrument(skip(self), fields(menu_item_id = %id), err)]
    fn set_availability(&self, id: MenuItemId, is_available: bool) -> Result<bool, StoreError> {
        self.runtime.block_on(async {
            let result = sqlx::query(
                "UPDATE menu_items SET is_available = $2 WHERE id = $1 AND is_available <> $2",
            )
            .bind(*id.as_uuid())
            .bind(is_available)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_availability", e))?;
            if result.rows_affected() > 0 {
                return Ok(true);
            }
            let exists = sqlx::query("SELECT 1 FROM menu_items WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("set_availability", e))?
                .is_some();
            if exists {
                Ok(false)
            } else {
                Err(StoreError::NotFound {
                    entity: "menu item",
                    id: id.to_string(),
                })
            }
        })
    }

    #[instrument(skip(self), fields(menu_item_id = %id), err)]
    fn load_recipe(&self, id: MenuItemId) -> Result<Vec<RecipeIngredient>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT menu_item_id, ingredient_id, quantity, unit, notes
                FROM recipe_ingredients
                WHERE menu_item_id = $1
                ORDER BY position ASC
                "#,
            )
            .bind(*id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_recipe", e))?;
            rows.iter().map(recipe_row_from_row).collect()
        })
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    fn load_recipes(
        &self,
        ids: &[MenuItemId],
    ) -> Result<HashMap<MenuItemId, Vec<RecipeIngredient>>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT menu_item_id, ingredient_id, quantity, unit, notes
                FROM recipe_ingredients
                WHERE menu_item_id = ANY($1)
                ORDER BY menu_item_id, position ASC
                "#,
            )
            .bind(uuids(ids))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_recipes", e))?;

            let mut recipes: HashMap<MenuItemId, Vec<RecipeIngredient>> =
                ids.iter().map(|id| (*id, Vec::new())).collect();
            for row in &rows {
                let recipe_row = recipe_row_from_row(row)?;
                recipes
                    .entry(recipe_row.menu_item_id)
                    .or_default()
                    .push(recipe_row);
            }
            Ok(recipes)
        })
    }

    #[instrument(skip(self, rows), fields(menu_item_id = %id, rows = rows.len()), err)]
    fn replace_recipe(&self, id: MenuItemId, rows: &[RecipeIngredient]) -> Result<(), StoreError> {
        if rows.iter().any(|r| r.menu_item_id != id) {
            return Err(StoreError::Backend(format!(
                "recipe rows for {id} reference another menu item"
            )));
        }
        self.runtime.block_on(async {
            let mut tx = self.begin("replace_recipe").await?;

            // Lock the menu item so concurrent replacements serialize.
            let exists = sqlx::query("SELECT 1 FROM menu_items WHERE id = $1 FOR UPDATE")
                .bind(*id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_recipe", e))?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound {
                    entity: "menu item",
                    id: id.to_string(),
                });
            }

            sqlx::query("DELETE FROM recipe_ingredients WHERE menu_item_id = $1")
                .bind(*id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_recipe", e))?;

            for (position, row) in rows.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO recipe_ingredients (
                        menu_item_id, ingredient_id, position, quantity, unit, notes
                    )
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(*id.as_uuid())
                .bind(*row.ingredient_id.as_uuid())
                .bind(position as i32)
                .bind(row.quantity)
                .bind(&row.unit)
                .bind(row.notes.as_deref())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_recipe", e))?;
            }

            self.commit(tx, "replace_recipe").await
        })
    }

    #[instrument(skip(self, ingredients), fields(count = ingredients.len()), err)]
    fn menu_items_using(&self, ingredients: &[IngredientId]) -> Result<Vec<MenuItemId>, StoreError> {
        self.runtime.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT DISTINCT menu_item_id
                FROM recipe_ingredients
                WHERE ingredient_id = ANY($1)
                ORDER BY menu_item_id
                "#,
            )
            .bind(uuids(ingredients))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("menu_items_using", e))?;
            rows.iter()
                .map(|row| {
                    row.try_get::<Uuid, _>("menu_item_id")
                        .map(MenuItemId::from_uuid)
                        .map_err(|e| decode_error("menu_items_using", e))
                })
                .collect()
        })
    }
}

/// Rows sorted by ingredient id so concurrent batches take row locks in the same
/// order. The sort is stable, so rows of one ingredient keep their batch order.
fn lock_order(rows: &[StockTransaction]) -> Vec<&StockTransaction> {
    let mut ordered: Vec<&StockTransaction> = rows.iter().collect();
    ordered.sort_by_key(|row| row.ingredient_id);
    ordered
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            error_for_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Serialization failures and deadlocks are retryable conflicts; the ledger re-reads
/// and re-decides on `Concurrency`.
fn error_for_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23505") => StoreError::Duplicate(msg),
        Some("23514") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
        Some("23503") => StoreError::NotFound {
            entity: "referenced row",
            id: msg,
        },
        _ => StoreError::Backend(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(ingredient_id: IngredientId) -> StockTransaction {
        StockTransaction {
            id: TransactionId::new(),
            ingredient_id,
            movement_type: MovementType::Usage,
            quantity: Decimal::NEGATIVE_ONE,
            previous_quantity: Decimal::ONE,
            new_quantity: Decimal::ZERO,
            unit_price: None,
            occurred_at: Utc::now(),
            actor_id: UserId::new(),
            notes: None,
            order_id: None,
            menu_item_id: None,
        }
    }

    #[test]
    fn batches_touching_the_same_ingredients_lock_in_the_same_order() {
        let flour = IngredientId::new();
        let cheese = IngredientId::new();
        // Pizza books flour then cheese, cheese toast books cheese then flour.
        let pizza = vec![usage(flour), usage(cheese)];
        let toast = vec![usage(cheese), usage(flour)];

        let pizza_order: Vec<IngredientId> = lock_order(&pizza).iter().map(|r| r.ingredient_id).collect();
        let toast_order: Vec<IngredientId> = lock_order(&toast).iter().map(|r| r.ingredient_id).collect();

        assert_eq!(pizza_order, toast_order);
        assert!(pizza_order.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn lock_order_keeps_every_row() {
        let flour = IngredientId::new();
        let rows = vec![usage(flour), usage(IngredientId::new()), usage(flour)];
        let ordered = lock_order(&rows);
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered.iter().filter(|r| r.ingredient_id == flour).count(), 2);
    }

    #[test]
    fn deadlock_and_serialization_failures_are_retryable() {
        for code in ["40P01", "40001", "23514"] {
            assert!(
                matches!(error_for_sqlstate(Some(code), code.to_string()), StoreError::Concurrency(_)),
                "{code} should map to a concurrency conflict"
            );
        }
    }

    #[test]
    fn other_sqlstates_keep_their_meaning() {
        assert!(matches!(error_for_sqlstate(Some("23505"), String::new()), StoreError::Duplicate(_)));
        assert!(matches!(
            error_for_sqlstate(Some("23503"), String::new()),
            StoreError::NotFound { entity: "referenced row", .. }
        ));
        assert!(matches!(error_for_sqlstate(Some("08006"), String::new()), StoreError::Backend(_)));
        assert!(matches!(error_for_sqlstate(None, String::new()), StoreError::Backend(_)));
    }
}
