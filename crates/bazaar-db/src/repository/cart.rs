//! # Cart Repository
//!
//! Database operations for cart lines: the in-cart set that checkout
//! consumes and the saved-for-later set it never touches.
//!
//! ## Line Movement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │     in cart  ◄──── move_to_cart ────  saved for later                   │
//! │     in cart  ──── move_to_saved ────► saved for later                   │
//! │                                                                         │
//! │  A move transfers quantity: merge into the destination line, drain     │
//! │  the source, delete the source when it hits zero. All three            │
//! │  statements run in one transaction.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use bazaar_core::validation::{validate_cart_size, validate_quantity};
use bazaar_core::CartLine;

/// Repository for cart line database operations.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Puts a line in the buyer's cart.
    ///
    /// If the (product, seller) line is already in the cart its quantity is
    /// replaced, not accumulated.
    pub async fn add_line(
        &self,
        buyer_id: &str,
        product_id: &str,
        seller_id: &str,
        quantity: i64,
    ) -> DbResult<()> {
        validate_quantity(quantity).map_err(DbError::Validation)?;

        // Bound cart growth: count the OTHER in-cart lines, since replacing
        // an existing line at the cap is still allowed
        let others: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM cart_items
            WHERE buyer_id = ?1 AND is_in_cart = TRUE
              AND NOT (product_id = ?2 AND seller_id = ?3)
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .fetch_one(&self.pool)
        .await?;
        validate_cart_size(others as usize + 1).map_err(DbError::Validation)?;

        debug!(buyer_id = %buyer_id, product_id = %product_id, seller_id = %seller_id, qty = %quantity, "Adding cart line");

        sqlx::query(
            r#"
            INSERT INTO cart_items (buyer_id, product_id, seller_id, quantity, is_in_cart)
            VALUES (?1, ?2, ?3, ?4, TRUE)
            ON CONFLICT (buyer_id, product_id, seller_id, is_in_cart)
            DO UPDATE SET quantity = excluded.quantity
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sets the quantity of an in-cart line.
    pub async fn update_quantity(
        &self,
        buyer_id: &str,
        product_id: &str,
        seller_id: &str,
        quantity: i64,
    ) -> DbResult<()> {
        validate_quantity(quantity).map_err(DbError::Validation)?;

        let result = sqlx::query(
            r#"
            UPDATE cart_items
            SET quantity = ?4
            WHERE buyer_id = ?1 AND product_id = ?2 AND seller_id = ?3 AND is_in_cart = TRUE
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Cart line", product_id));
        }

        Ok(())
    }

    /// Removes one line from the cart or the saved-for-later list.
    pub async fn remove_line(
        &self,
        buyer_id: &str,
        product_id: &str,
        seller_id: &str,
        in_cart: bool,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE buyer_id = ?1 AND product_id = ?2 AND seller_id = ?3 AND is_in_cart = ?4
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(in_cart)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Moves quantity from the cart to the saved-for-later list.
    pub async fn move_to_saved(
        &self,
        buyer_id: &str,
        product_id: &str,
        seller_id: &str,
        quantity: i64,
    ) -> DbResult<()> {
        self.transfer(buyer_id, product_id, seller_id, quantity, true)
            .await
    }

    /// Moves quantity from the saved-for-later list back into the cart.
    pub async fn move_to_cart(
        &self,
        buyer_id: &str,
        product_id: &str,
        seller_id: &str,
        quantity: i64,
    ) -> DbResult<()> {
        self.transfer(buyer_id, product_id, seller_id, quantity, false)
            .await
    }

    /// Transfers quantity between the two is_in_cart subsets.
    ///
    /// `from_cart == true` moves cart → saved; `false` moves saved → cart.
    /// Merge into the destination first, then drain the source: decrement
    /// when more than `quantity` remains, delete when the line is spent.
    async fn transfer(
        &self,
        buyer_id: &str,
        product_id: &str,
        seller_id: &str,
        quantity: i64,
        from_cart: bool,
    ) -> DbResult<()> {
        validate_quantity(quantity).map_err(DbError::Validation)?;

        debug!(buyer_id = %buyer_id, product_id = %product_id, from_cart = %from_cart, qty = %quantity, "Transferring cart line");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO cart_items (buyer_id, product_id, seller_id, quantity, is_in_cart)
            VALUES (?1, ?2, ?3, ?4, NOT ?5)
            ON CONFLICT (buyer_id, product_id, seller_id, is_in_cart)
            DO UPDATE SET quantity = cart_items.quantity + excluded.quantity
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(quantity)
        .bind(from_cart)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE cart_items
            SET quantity = quantity - ?4
            WHERE buyer_id = ?1 AND product_id = ?2 AND seller_id = ?3
              AND is_in_cart = ?5 AND quantity > ?4
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(quantity)
        .bind(from_cart)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE buyer_id = ?1 AND product_id = ?2 AND seller_id = ?3
              AND is_in_cart = ?5 AND quantity <= ?4
            "#,
        )
        .bind(buyer_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(quantity)
        .bind(from_cart)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Lists a buyer's lines: the cart (`in_cart == true`) or the
    /// saved-for-later list (`in_cart == false`).
    pub async fn lines_for_buyer(&self, buyer_id: &str, in_cart: bool) -> DbResult<Vec<CartLine>> {
        let lines = sqlx::query_as::<_, CartLine>(
            r#"
            SELECT buyer_id, product_id, seller_id, quantity, is_in_cart
            FROM cart_items
            WHERE buyer_id = ?1 AND is_in_cart = ?2
            ORDER BY seller_id, product_id
            "#,
        )
        .bind(buyer_id)
        .bind(in_cart)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    // =========================================================================
    // Transaction-Scoped Operations
    // =========================================================================

    /// Reads the buyer's in-cart lines joined with seller payee and product
    /// category, inside the checkout transaction.
    ///
    /// Rows come back in ascending (seller, product) order - the same global
    /// order checkout uses for all inventory access.
    pub async fn in_cart_lines_tx(
        conn: &mut SqliteConnection,
        buyer_id: &str,
    ) -> DbResult<Vec<PendingLine>> {
        let lines = sqlx::query_as::<_, PendingLine>(
            r#"
            SELECT c.product_id,
                   c.seller_id,
                   s.party_id AS payee_id,
                   p.category_id,
                   c.quantity
            FROM cart_items c
            JOIN sellers s ON s.id = c.seller_id
            JOIN products p ON p.id = c.product_id
            WHERE c.buyer_id = ?1 AND c.is_in_cart = TRUE
            ORDER BY c.seller_id, c.product_id
            "#,
        )
        .bind(buyer_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(lines)
    }

    /// Deletes the buyer's in-cart lines inside the checkout transaction.
    /// Saved-for-later lines are untouched.
    pub async fn clear_in_cart_tx(conn: &mut SqliteConnection, buyer_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE buyer_id = ?1 AND is_in_cart = TRUE")
            .bind(buyer_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

/// One in-cart line with the joins checkout needs: who gets paid and which
/// category the product is in. Pricing and stock are merged in from the
/// locked inventory read.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingLine {
    pub product_id: String,
    pub seller_id: String,
    pub payee_id: String,
    pub category_id: String,
    pub quantity: i64,
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

    async fn seeded() -> (Database, String, String, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let buyer = db.parties().create_party("Ada", 0, None).await.unwrap();
        let payee = db.parties().create_party("Shop", 0, None).await.unwrap();
        let seller = db.parties().register_seller(&payee.id).await.unwrap();

        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: "books".to_string(),
            name: "Ledger Tales".to_string(),
        };
        db.products().insert(&product).await.unwrap();

        (db, buyer.id, seller.id, product.id)
    }

    #[tokio::test]
    async fn test_add_line_replaces_quantity() {
        let (db, buyer, seller, product) = seeded().await;

        db.carts().add_line(&buyer, &product, &seller, 2).await.unwrap();
        db.carts().add_line(&buyer, &product, &seller, 5).await.unwrap();

        let lines = db.carts().lines_for_buyer(&buyer, true).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
    }

    #[tokio::test]
    async fn test_update_quantity() {
        let (db, buyer, seller, product) = seeded().await;

        db.carts().add_line(&buyer, &product, &seller, 2).await.unwrap();
        db.carts()
            .update_quantity(&buyer, &product, &seller, 7)
            .await
            .unwrap();

        let lines = db.carts().lines_for_buyer(&buyer, true).await.unwrap();
        assert_eq!(lines[0].quantity, 7);

        // Updating a missing line errors
        let err = db
            .carts()
            .update_quantity(&buyer, "no-such-product", &seller, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        // Zero quantity is rejected outright
        assert!(db
            .carts()
            .update_quantity(&buyer, &product, &seller, 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_move_partial_quantity_to_saved() {
        let (db, buyer, seller, product) = seeded().await;

        db.carts().add_line(&buyer, &product, &seller, 3).await.unwrap();
        db.carts()
            .move_to_saved(&buyer, &product, &seller, 1)
            .await
            .unwrap();

        let in_cart = db.carts().lines_for_buyer(&buyer, true).await.unwrap();
        let saved = db.carts().lines_for_buyer(&buyer, false).await.unwrap();
        assert_eq!(in_cart[0].quantity, 2);
        assert_eq!(saved[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_move_entire_line_deletes_source() {
        let (db, buyer, seller, product) = seeded().await;

        db.carts().add_line(&buyer, &product, &seller, 3).await.unwrap();
        db.carts()
            .move_to_saved(&buyer, &product, &seller, 3)
            .await
            .unwrap();

        assert!(db.carts().lines_for_buyer(&buyer, true).await.unwrap().is_empty());
        let saved = db.carts().lines_for_buyer(&buyer, false).await.unwrap();
        assert_eq!(saved[0].quantity, 3);

        // And back again, merging into a fresh cart line
        db.carts()
            .move_to_cart(&buyer, &product, &seller, 3)
            .await
            .unwrap();
        let in_cart = db.carts().lines_for_buyer(&buyer, true).await.unwrap();
        assert_eq!(in_cart[0].quantity, 3);
        assert!(db.carts().lines_for_buyer(&buyer, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_line() {
        let (db, buyer, seller, product) = seeded().await;

        db.carts().add_line(&buyer, &product, &seller, 2).await.unwrap();
        db.carts()
            .remove_line(&buyer, &product, &seller, true)
            .await
            .unwrap();

        assert!(db.carts().lines_for_buyer(&buyer, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_cart_lines_join_payee_and_category() {
        let (db, buyer, seller, product) = seeded().await;

        db.carts().add_line(&buyer, &product, &seller, 2).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let lines = CartRepository::in_cart_lines_tx(&mut *conn, &buyer).await.unwrap();

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].category_id, "books");
        assert_eq!(lines[0].quantity, 2);
        // Payee is the seller's linked party, not the seller id
        assert_ne!(lines[0].payee_id, seller);
    }
}
