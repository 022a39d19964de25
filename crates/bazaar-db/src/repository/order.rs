//! # Order Repository
//!
//! Database operations for orders and order lines.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CHECKOUT COMMIT (checkout module, same transaction)                │
//! │     └── insert_order_tx() → Order { status: Pending }                  │
//! │     └── insert_line_tx() per cart line                                 │
//! │                                                                         │
//! │  2. FULFILLMENT (sellers, one line at a time)                          │
//! │     └── mark_line_fulfilled() → sets the line's fulfilled_at           │
//! │     └── status roll-up: none → Pending, some → Partial,                │
//! │         all → Fulfilled (order fulfilled_at stamped)                   │
//! │                                                                         │
//! │  Checkout never moves status past Pending; fulfillment events do.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use bazaar_core::{Order, OrderLine, OrderStatus};

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, buyer_id, shipping_address, status, placed_at, fulfilled_at
            FROM orders
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// Gets a buyer's orders, newest first.
    pub async fn orders_for_buyer(&self, buyer_id: &str) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, buyer_id, shipping_address, status, placed_at, fulfilled_at
            FROM orders
            WHERE buyer_id = ?1
            ORDER BY placed_at DESC, id DESC
            "#,
        )
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// Gets all lines for an order.
    pub async fn lines_for_order(&self, order_id: &str) -> DbResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT order_id, product_id, seller_id, quantity,
                   unit_price_cents, discount_cents, fulfilled_at
            FROM order_lines
            WHERE order_id = ?1
            ORDER BY seller_id, product_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Gets a seller's order lines, unfulfilled first - the seller's work
    /// queue.
    pub async fn lines_for_seller(&self, seller_id: &str) -> DbResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT order_id, product_id, seller_id, quantity,
                   unit_price_cents, discount_cents, fulfilled_at
            FROM order_lines
            WHERE seller_id = ?1
            ORDER BY fulfilled_at IS NOT NULL, order_id, product_id
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Marks one order line fulfilled and rolls the order status up.
    ///
    /// Idempotent on the line: a second call leaves the original
    /// `fulfilled_at` in place. Roll-up: no lines fulfilled → `Pending`,
    /// some → `Partial`, all → `Fulfilled` (stamping the order's
    /// `fulfilled_at`).
    pub async fn mark_line_fulfilled(
        &self,
        order_id: &str,
        product_id: &str,
        seller_id: &str,
    ) -> DbResult<Order> {
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE order_lines
            SET fulfilled_at = COALESCE(fulfilled_at, ?4)
            WHERE order_id = ?1 AND product_id = ?2 AND seller_id = ?3
            "#,
        )
        .bind(order_id)
        .bind(product_id)
        .bind(seller_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order line", product_id));
        }

        let (total, fulfilled): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(fulfilled_at)
            FROM order_lines
            WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        let status = if fulfilled == 0 {
            OrderStatus::Pending
        } else if fulfilled < total {
            OrderStatus::Partial
        } else {
            OrderStatus::Fulfilled
        };

        if status == OrderStatus::Fulfilled {
            sqlx::query(
                "UPDATE orders SET status = ?2, fulfilled_at = COALESCE(fulfilled_at, ?3) WHERE id = ?1",
            )
            .bind(order_id)
            .bind(status)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE orders SET status = ?2 WHERE id = ?1")
                .bind(order_id)
                .bind(status)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(order_id = %order_id, product_id = %product_id, status = ?status, "Order line fulfilled");

        self.get(order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))
    }

    // =========================================================================
    // Transaction-Scoped Operations
    // =========================================================================

    /// Inserts a pending order inside the checkout transaction.
    pub async fn insert_order_tx(
        conn: &mut SqliteConnection,
        buyer_id: &str,
        shipping_address: Option<&str>,
    ) -> DbResult<Order> {
        let order = Order {
            id: Uuid::new_v4().to_string(),
            buyer_id: buyer_id.to_string(),
            shipping_address: shipping_address.map(String::from),
            status: OrderStatus::Pending,
            placed_at: Utc::now(),
            fulfilled_at: None,
        };

        debug!(order_id = %order.id, buyer_id = %buyer_id, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (id, buyer_id, shipping_address, status, placed_at, fulfilled_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL)
            "#,
        )
        .bind(&order.id)
        .bind(&order.buyer_id)
        .bind(&order.shipping_address)
        .bind(order.status)
        .bind(order.placed_at)
        .execute(&mut *conn)
        .await?;

        Ok(order)
    }

    /// Inserts one order line inside the checkout transaction.
    ///
    /// The unit price is the seller's price at the moment of sale and
    /// `discount_cents` is the discount for the whole line.
    pub async fn insert_line_tx(conn: &mut SqliteConnection, line: &OrderLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (order_id, product_id, seller_id, quantity,
                                     unit_price_cents, discount_cents, fulfilled_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
            "#,
        )
        .bind(&line.order_id)
        .bind(&line.product_id)
        .bind(&line.seller_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.discount_cents)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
