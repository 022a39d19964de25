//! # Inventory Repository
//!
//! Database operations for per-(seller, product) offers: price and stock.
//!
//! ## The Two Halves
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Maintenance (pool-scoped)          Checkout (transaction-scoped)       │
//! │  ─────────────────────────          ─────────────────────────────       │
//! │  set_offer      upsert price/qty    lock_and_read   read under lock     │
//! │  get            one offer           decrement_tx    guarded decrement   │
//! │  for_seller     seller's offers                                         │
//! │  offers_for_product                                                     │
//! │                                                                         │
//! │  quantity_on_hand never goes negative: the decrement carries its own   │
//! │  floor check, and checkout pre-validates under the same lock, so the   │
//! │  guard firing means a locking bug, not a user error.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use bazaar_core::validation::validate_price_cents;
use bazaar_core::InventoryLevel;

/// Repository for inventory database operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Creates or replaces a seller's offer of a product.
    pub async fn set_offer(
        &self,
        seller_id: &str,
        product_id: &str,
        price_cents: i64,
        quantity_on_hand: i64,
    ) -> DbResult<()> {
        validate_price_cents(price_cents).map_err(DbError::Validation)?;
        if quantity_on_hand < 0 {
            return Err(DbError::Validation(
                bazaar_core::ValidationError::MustBePositive {
                    field: "quantity_on_hand".to_string(),
                },
            ));
        }

        debug!(seller_id = %seller_id, product_id = %product_id, price = %price_cents, qty = %quantity_on_hand, "Setting offer");

        sqlx::query(
            r#"
            INSERT INTO inventory (seller_id, product_id, price_cents, quantity_on_hand, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (seller_id, product_id)
            DO UPDATE SET price_cents = excluded.price_cents,
                          quantity_on_hand = excluded.quantity_on_hand,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(seller_id)
        .bind(product_id)
        .bind(price_cents)
        .bind(quantity_on_hand)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets one offer.
    pub async fn get(&self, seller_id: &str, product_id: &str) -> DbResult<Option<InventoryLevel>> {
        let level = sqlx::query_as::<_, InventoryLevel>(
            r#"
            SELECT seller_id, product_id, price_cents, quantity_on_hand, updated_at
            FROM inventory
            WHERE seller_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(seller_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(level)
    }

    /// Lists a seller's offers.
    pub async fn for_seller(&self, seller_id: &str) -> DbResult<Vec<InventoryLevel>> {
        let levels = sqlx::query_as::<_, InventoryLevel>(
            r#"
            SELECT seller_id, product_id, price_cents, quantity_on_hand, updated_at
            FROM inventory
            WHERE seller_id = ?1
            ORDER BY product_id
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    /// Lists every seller's offer of one product.
    pub async fn offers_for_product(&self, product_id: &str) -> DbResult<Vec<InventoryLevel>> {
        let levels = sqlx::query_as::<_, InventoryLevel>(
            r#"
            SELECT seller_id, product_id, price_cents, quantity_on_hand, updated_at
            FROM inventory
            WHERE product_id = ?1
            ORDER BY seller_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(levels)
    }

    // =========================================================================
    // Transaction-Scoped Operations
    // =========================================================================

    /// Reads the inventory rows for a set of (seller, product) keys inside
    /// the checkout transaction.
    ///
    /// Keys are deduplicated and read in ascending (seller, product) order -
    /// the one global ordering every checkout uses. Missing keys are simply
    /// absent from the result; the caller decides what a cart line without
    /// an offer means.
    pub async fn lock_and_read(
        conn: &mut SqliteConnection,
        keys: &[(String, String)],
    ) -> DbResult<BTreeMap<(String, String), InventoryLevel>> {
        // BTreeSet-like dedup + global lock order in one step
        let mut sorted: Vec<&(String, String)> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut levels = BTreeMap::new();

        for (seller_id, product_id) in sorted {
            let level = sqlx::query_as::<_, InventoryLevel>(
                r#"
                SELECT seller_id, product_id, price_cents, quantity_on_hand, updated_at
                FROM inventory
                WHERE seller_id = ?1 AND product_id = ?2
                "#,
            )
            .bind(seller_id)
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(level) = level {
                levels.insert((seller_id.clone(), product_id.clone()), level);
            }
        }

        Ok(levels)
    }

    /// Decrements one offer's stock inside the checkout transaction.
    ///
    /// Returns `false` when the floor check fails (the decrement would take
    /// stock negative). Checkout pre-validates under the same lock, so a
    /// `false` here is an internal invariant violation, never user input.
    pub async fn decrement_tx(
        conn: &mut SqliteConnection,
        seller_id: &str,
        product_id: &str,
        quantity: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity_on_hand = quantity_on_hand - ?3, updated_at = ?4
            WHERE seller_id = ?1 AND product_id = ?2 AND quantity_on_hand >= ?3
            "#,
        )
        .bind(seller_id)
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use bazaar_core::Product;
    use uuid::Uuid;

    async fn seeded() -> (Database, String, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let payee = db.parties().create_party("Shop", 0, None).await.unwrap();
        let seller = db.parties().register_seller(&payee.id).await.unwrap();

        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: "tools".to_string(),
            name: "Wrench".to_string(),
        };
        db.products().insert(&product).await.unwrap();

        (db, seller.id, product.id)
    }

    #[tokio::test]
    async fn test_set_offer_upserts() {
        let (db, seller_id, product_id) = seeded().await;

        db.inventory()
            .set_offer(&seller_id, &product_id, 1500, 10)
            .await
            .unwrap();

        let level = db
            .inventory()
            .get(&seller_id, &product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.price_cents, 1500);
        assert_eq!(level.quantity_on_hand, 10);

        // Second write replaces, not duplicates
        db.inventory()
            .set_offer(&seller_id, &product_id, 1750, 4)
            .await
            .unwrap();

        let level = db
            .inventory()
            .get(&seller_id, &product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.price_cents, 1750);
        assert_eq!(level.quantity_on_hand, 4);

        assert_eq!(db.inventory().for_seller(&seller_id).await.unwrap().len(), 1);
        assert_eq!(
            db.inventory()
                .offers_for_product(&product_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_negative_offer_rejected() {
        let (db, seller_id, product_id) = seeded().await;

        assert!(db
            .inventory()
            .set_offer(&seller_id, &product_id, -5, 1)
            .await
            .is_err());
        assert!(db
            .inventory()
            .set_offer(&seller_id, &product_id, 5, -1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_decrement_floor_check() {
        let (db, seller_id, product_id) = seeded().await;

        db.inventory()
            .set_offer(&seller_id, &product_id, 1000, 3)
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();

        assert!(
            InventoryRepository::decrement_tx(&mut *conn, &seller_id, &product_id, 3)
                .await
                .unwrap()
        );

        // Stock is now 0; any further decrement trips the floor check
        assert!(
            !InventoryRepository::decrement_tx(&mut *conn, &seller_id, &product_id, 1)
                .await
                .unwrap()
        );

        drop(conn);
        let level = db
            .inventory()
            .get(&seller_id, &product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity_on_hand, 0);
    }

    #[tokio::test]
    async fn test_lock_and_read_sorted_and_deduped() {
        let (db, seller_id, product_id) = seeded().await;

        db.inventory()
            .set_offer(&seller_id, &product_id, 1000, 3)
            .await
            .unwrap();

        let keys = vec![
            (seller_id.clone(), product_id.clone()),
            (seller_id.clone(), product_id.clone()),
            ("no-such-seller".to_string(), product_id.clone()),
        ];

        let mut conn = db.pool().acquire().await.unwrap();
        let levels = InventoryRepository::lock_and_read(&mut *conn, &keys)
            .await
            .unwrap();

        // Duplicate collapsed, missing key absent
        assert_eq!(levels.len(), 1);
        assert_eq!(
            levels[&(seller_id.clone(), product_id.clone())].quantity_on_hand,
            3
        );
    }
}
