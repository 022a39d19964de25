//! # Checkout Orchestrator
//!
//! The transactional core of Bazaar: turn a buyer's cart into a committed,
//! settled order - or change nothing at all.
//!
//! ## The State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Started ──► Locked ──► Priced ──► Validated ──► Committed             │
//! │      │           │          │           │                               │
//! │      │           │          │           └──► Aborted(InsufficientStock │
//! │      │           │          │                        | InsufficientFunds)│
//! │      │           │          └──► Aborted(EmptyCart)                     │
//! │      │           └──► (coupon invalid? downgrade, continue)             │
//! │      └──► Aborted(LockTimeout)                                          │
//! │                                                                         │
//! │   Locked:    BEGIN IMMEDIATE takes the write lock; buyer row, cart     │
//! │              join, and inventory rows are read under it                │
//! │   Priced:    per-line subtotal/discount/total + per-payee credits      │
//! │   Validated: every line in stock, buyer can afford the total           │
//! │   Committed: order + lines written, stock decremented, balances        │
//! │              settled, cart cleared - one atomic unit                   │
//! │                                                                         │
//! │   No state before Committed is observable from outside: any abort      │
//! │   rolls back to exactly the pre-checkout database.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! Two checkouts touching the same inventory rows (or the same buyer)
//! serialize at the Lock step; the second observes fully committed state,
//! so stock validation never runs against stale numbers and oversell is
//! impossible. Checkouts on disjoint rows still serialize on SQLite's
//! single writer, which satisfies the same contract trivially. Lock waits
//! are bounded by the pool's busy timeout and surface as
//! [`CheckoutError::LockTimeout`].
//!
//! ## Idempotence
//! Checkout is NOT idempotent: retrying after a successful commit places a
//! second order and debits the buyer again. Duplicate-submission protection
//! (e.g. a one-shot form token) belongs to the request handler.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::DbError;
use crate::repository::cart::CartRepository;
use crate::repository::coupon::CouponRepository;
use crate::repository::inventory::InventoryRepository;
use crate::repository::order::OrderRepository;
use crate::repository::party::PartyRepository;
use bazaar_core::{
    price_cart, stock_shortages, CartLineSnapshot, DiscountRule, Money, OrderLine, PricedLine,
    StockShortage,
};

// =============================================================================
// Errors
// =============================================================================

/// Everything that can abort a checkout. Every variant rolls the entire
/// transaction back; there is no partial commit.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The buyer's in-cart set is empty (or every line points at an offer
    /// that no longer exists). A valid terminal state, surfaced to the user.
    #[error("Cart is empty")]
    EmptyCart,

    /// One or more lines ask for more units than the seller has. Carries
    /// every offending line, not just the first.
    #[error("Insufficient stock for {} line(s)", shortages.len())]
    InsufficientStock { shortages: Vec<StockShortage> },

    /// The order total exceeds the buyer's balance.
    #[error("Insufficient funds: need {required_cents} cents, have {available_cents}")]
    InsufficientFunds {
        required_cents: i64,
        available_cents: i64,
    },

    /// The database write lock could not be acquired within the configured
    /// bound. Transient: the caller may retry with backoff. All other
    /// variants are deterministic and must not be retried automatically.
    #[error("Checkout timed out waiting for the store lock")]
    LockTimeout,

    /// The guarded decrement found less stock than validation did moments
    /// earlier under the same lock. This cannot happen unless locking is
    /// broken; it is an internal invariant violation, never user input.
    #[error("Internal invariant violation: stock underflow for product {product_id} from seller {seller_id}")]
    NegativeStock {
        product_id: String,
        seller_id: String,
    },

    /// No such buyer.
    #[error("Buyer not found: {0}")]
    BuyerNotFound(String),

    /// Any other storage failure.
    #[error("Storage error: {0}")]
    Storage(DbError),
}

impl From<DbError> for CheckoutError {
    fn from(err: DbError) -> Self {
        match err {
            // Lock-wait exhaustion is its own checkout outcome
            DbError::Busy => CheckoutError::LockTimeout,
            other => CheckoutError::Storage(other),
        }
    }
}

impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        CheckoutError::from(DbError::from(err))
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// What happened to the coupon code the caller passed in.
///
/// The stored code is owned by the caller (session state); `Applied` and
/// `Rejected` both mean the caller should clear its copy - `Rejected`
/// additionally warrants a user-facing warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CouponOutcome {
    /// No code was supplied.
    NotRequested,
    /// The code resolved to a valid coupon and was applied (its discount
    /// may still be zero if no line matched the scope).
    Applied { code: String, percent: u8 },
    /// The code was unknown or expired; checkout continued undiscounted.
    Rejected { code: String },
}

/// The receipt for a committed checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub order_id: String,

    /// Amount debited from the buyer.
    pub order_total_cents: i64,

    /// Total discount across all lines.
    pub discount_cents: i64,

    /// Amount credited per seller payee.
    pub seller_totals: BTreeMap<String, i64>,

    /// Every line as priced at commit time.
    pub lines: Vec<PricedLine>,

    pub coupon: CouponOutcome,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs the checkout transaction.
#[derive(Debug, Clone)]
pub struct CheckoutOrchestrator {
    pool: SqlitePool,
}

impl CheckoutOrchestrator {
    /// Creates a new CheckoutOrchestrator.
    pub fn new(pool: SqlitePool) -> Self {
        CheckoutOrchestrator { pool }
    }

    /// Settles the buyer's cart as one order.
    ///
    /// ## Arguments
    /// * `buyer_id` - The buyer checking out
    /// * `coupon_code` - The buyer's currently applied code, if any, read
    ///   from caller-owned session state
    ///
    /// ## Returns
    /// * `Ok(CheckoutReceipt)` - the order id, the settled amounts, and the
    ///   coupon outcome (see [`CouponOutcome`] for what the caller clears)
    /// * `Err(CheckoutError)` - the specific abort reason; the database is
    ///   untouched
    pub async fn place_order(
        &self,
        buyer_id: &str,
        coupon_code: Option<&str>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;

        // Lock step: take the write lock up front so every read below sees
        // state no concurrent checkout can be mid-way through changing.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::run(&mut conn, buyer_id, coupon_code).await;

        match &result {
            Ok(receipt) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                info!(
                    buyer_id = %buyer_id,
                    order_id = %receipt.order_id,
                    total = %Money::from_cents(receipt.order_total_cents),
                    sellers = receipt.seller_totals.len(),
                    "Checkout committed"
                );
            }
            Err(err) => {
                // Roll back everything; the connection goes back to the
                // pool clean even if the ROLLBACK itself fails (dropped
                // connections are closed, not reused mid-transaction).
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                warn!(buyer_id = %buyer_id, error = %err, "Checkout aborted");
            }
        }

        result
    }

    /// The locked section: every step between BEGIN IMMEDIATE and
    /// COMMIT/ROLLBACK. Any `Err` return rolls the whole unit back.
    async fn run(
        conn: &mut SqliteConnection,
        buyer_id: &str,
        coupon_code: Option<&str>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let now = Utc::now();

        // --- Locked: buyer row -------------------------------------------
        let buyer: Option<(i64, Option<String>)> =
            sqlx::query_as("SELECT balance_cents, shipping_address FROM parties WHERE id = ?1")
                .bind(buyer_id)
                .fetch_optional(&mut *conn)
                .await?;

        let (balance_cents, shipping_address) = match buyer {
            Some(row) => row,
            None => return Err(CheckoutError::BuyerNotFound(buyer_id.to_string())),
        };

        // --- Locked: cart lines and inventory ----------------------------
        let pending = CartRepository::in_cart_lines_tx(conn, buyer_id).await?;

        let keys: Vec<(String, String)> = pending
            .iter()
            .map(|l| (l.seller_id.clone(), l.product_id.clone()))
            .collect();
        let levels = InventoryRepository::lock_and_read(conn, &keys).await?;

        // Cart lines whose offer disappeared are dropped, not fatal: the
        // buyer's cart may be stale, the rest of it still settles.
        let snapshot: Vec<CartLineSnapshot> = pending
            .into_iter()
            .filter_map(|line| {
                match levels.get(&(line.seller_id.clone(), line.product_id.clone())) {
                    Some(level) => Some(CartLineSnapshot {
                        product_id: line.product_id,
                        seller_id: line.seller_id,
                        payee_id: line.payee_id,
                        category_id: line.category_id,
                        quantity: line.quantity,
                        unit_price_cents: level.price_cents,
                        quantity_on_hand: level.quantity_on_hand,
                    }),
                    None => {
                        warn!(
                            buyer_id = %buyer_id,
                            product_id = %line.product_id,
                            seller_id = %line.seller_id,
                            "Dropping cart line with no matching offer"
                        );
                        None
                    }
                }
            })
            .collect();

        if snapshot.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        debug!(buyer_id = %buyer_id, lines = snapshot.len(), "Cart snapshot taken");

        // --- Resolve discount --------------------------------------------
        // Invalid is recoverable: continue with no discount, tell the
        // caller via the receipt so it clears the stored code.
        let (rule, coupon_outcome) = match coupon_code {
            None => (DiscountRule::none(), CouponOutcome::NotRequested),
            Some(code) => match CouponRepository::resolve_tx(conn, code, now).await? {
                Some(coupon) => {
                    let outcome = CouponOutcome::Applied {
                        code: coupon.code.clone(),
                        percent: coupon.discount_percent,
                    };
                    (coupon.rule(), outcome)
                }
                None => {
                    warn!(buyer_id = %buyer_id, code = %code, "Coupon invalid or expired, continuing without discount");
                    (
                        DiscountRule::none(),
                        CouponOutcome::Rejected {
                            code: code.to_string(),
                        },
                    )
                }
            },
        };

        // --- Priced -------------------------------------------------------
        let priced = price_cart(&snapshot, &rule);

        // --- Validated: stock then funds ---------------------------------
        let shortages = stock_shortages(&snapshot);
        if !shortages.is_empty() {
            return Err(CheckoutError::InsufficientStock { shortages });
        }

        if balance_cents < priced.order_total_cents {
            return Err(CheckoutError::InsufficientFunds {
                required_cents: priced.order_total_cents,
                available_cents: balance_cents,
            });
        }

        // --- Committed: write everything ---------------------------------
        let order =
            OrderRepository::insert_order_tx(conn, buyer_id, shipping_address.as_deref()).await?;

        for line in &priced.lines {
            OrderRepository::insert_line_tx(
                conn,
                &OrderLine {
                    order_id: order.id.clone(),
                    product_id: line.product_id.clone(),
                    seller_id: line.seller_id.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price_cents,
                    discount_cents: line.line_discount_cents,
                    fulfilled_at: None,
                },
            )
            .await?;

            let decremented =
                InventoryRepository::decrement_tx(conn, &line.seller_id, &line.product_id, line.quantity)
                    .await?;
            if !decremented {
                // Validation passed under this very lock; reaching here
                // means the locking contract is broken somewhere.
                return Err(CheckoutError::NegativeStock {
                    product_id: line.product_id.clone(),
                    seller_id: line.seller_id.clone(),
                });
            }
        }

        // Settlement: one debit, one credit per payee, each mirrored in the
        // transaction log. The BTreeMap iterates payees in a stable order.
        PartyRepository::adjust_balance_tx(conn, buyer_id, -priced.order_total_cents).await?;
        PartyRepository::record_transaction_tx(
            conn,
            buyer_id,
            -priced.order_total_cents,
            Some(&order.id),
        )
        .await?;

        for (payee_id, amount_cents) in &priced.seller_totals {
            PartyRepository::adjust_balance_tx(conn, payee_id, *amount_cents).await?;
            PartyRepository::record_transaction_tx(conn, payee_id, *amount_cents, Some(&order.id))
                .await?;
        }

        CartRepository::clear_in_cart_tx(conn, buyer_id).await?;

        Ok(CheckoutReceipt {
            order_id: order.id,
            order_total_cents: priced.order_total_cents,
            discount_cents: priced.total_discount_cents(),
            seller_totals: priced.seller_totals,
            lines: priced.lines,
            coupon: coupon_outcome,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use bazaar_core::{Coupon, OrderStatus, Product};
    use chrono::Duration;
    use uuid::Uuid;

    /// One buyer, one seller, one product with a fresh offer.
    struct Market {
        db: Database,
        buyer_id: String,
        seller_id: String,
        payee_id: String,
        product_id: String,
    }

    async fn market(buyer_balance: i64, price: i64, stock: i64) -> Market {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let buyer = db
            .parties()
            .create_party("Ada", buyer_balance, Some("12 Loop Rd"))
            .await
            .unwrap();
        let payee = db.parties().create_party("Shop", 0, None).await.unwrap();
        let seller = db.parties().register_seller(&payee.id).await.unwrap();

        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: "books".to_string(),
            name: "Ledger Tales".to_string(),
        };
        db.products().insert(&product).await.unwrap();
        db.inventory()
            .set_offer(&seller.id, &product.id, price, stock)
            .await
            .unwrap();

        Market {
            db,
            buyer_id: buyer.id,
            seller_id: seller.id,
            payee_id: payee.id,
            product_id: product.id,
        }
    }

    /// Asserts the audit invariant for one party:
    /// balance == Σ signed transaction amounts.
    async fn assert_balance_matches_log(db: &Database, party_id: &str) {
        let balance = db.parties().balance(party_id).await.unwrap();
        let logged: i64 = db
            .parties()
            .transactions_for_party(party_id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.amount_cents)
            .sum();
        assert_eq!(balance, logged, "balance diverged from transaction log");
    }

    /// Scenario A: plain checkout debits the buyer, credits the seller,
    /// decrements stock, clears the cart, and leaves a pending order.
    #[tokio::test]
    async fn test_checkout_commits_and_settles() {
        let m = market(10_000, 2000, 10).await;

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 2)
            .await
            .unwrap();

        let receipt = m
            .db
            .checkout()
            .place_order(&m.buyer_id, None)
            .await
            .unwrap();

        assert_eq!(receipt.order_total_cents, 4000);
        assert_eq!(receipt.discount_cents, 0);
        assert_eq!(receipt.coupon, CouponOutcome::NotRequested);
        assert_eq!(receipt.seller_totals[&m.payee_id], 4000);

        // Balances settled both ways
        assert_eq!(m.db.parties().balance(&m.buyer_id).await.unwrap(), 6000);
        assert_eq!(m.db.parties().balance(&m.payee_id).await.unwrap(), 4000);

        // Stock decremented
        let level = m
            .db
            .inventory()
            .get(&m.seller_id, &m.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity_on_hand, 8);

        // Cart consumed
        assert!(m
            .db
            .carts()
            .lines_for_buyer(&m.buyer_id, true)
            .await
            .unwrap()
            .is_empty());

        // Order record present and pending
        let order = m.db.orders().get(&receipt.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.shipping_address.as_deref(), Some("12 Loop Rd"));

        let lines = m.db.orders().lines_for_order(&receipt.order_id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_price_cents, 2000);
        assert_eq!(lines[0].quantity, 2);

        // Transaction log references the order from both sides
        let buyer_txns = m
            .db
            .parties()
            .transactions_for_party(&m.buyer_id)
            .await
            .unwrap();
        assert_eq!(buyer_txns[0].amount_cents, -4000);
        assert_eq!(buyer_txns[0].order_id.as_deref(), Some(receipt.order_id.as_str()));

        assert_balance_matches_log(&m.db, &m.buyer_id).await;
        assert_balance_matches_log(&m.db, &m.payee_id).await;
    }

    /// Scenario B: a short line aborts the whole checkout and changes nothing.
    #[tokio::test]
    async fn test_insufficient_stock_aborts_cleanly() {
        let m = market(10_000, 2000, 1).await;

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 2)
            .await
            .unwrap();

        let err = m
            .db
            .checkout()
            .place_order(&m.buyer_id, None)
            .await
            .unwrap_err();

        match err {
            CheckoutError::InsufficientStock { shortages } => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].product_id, m.product_id);
                assert_eq!(shortages[0].seller_id, m.seller_id);
                assert_eq!(shortages[0].requested, 2);
                assert_eq!(shortages[0].available, 1);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        // Nothing changed
        assert_eq!(m.db.parties().balance(&m.buyer_id).await.unwrap(), 10_000);
        assert_eq!(m.db.parties().balance(&m.payee_id).await.unwrap(), 0);
        let level = m
            .db
            .inventory()
            .get(&m.seller_id, &m.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity_on_hand, 1);
        assert_eq!(
            m.db.carts()
                .lines_for_buyer(&m.buyer_id, true)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(m
            .db
            .orders()
            .orders_for_buyer(&m.buyer_id)
            .await
            .unwrap()
            .is_empty());
    }

    /// Scenario C: a global 10% coupon on a 5000¢ line discounts 500¢.
    #[tokio::test]
    async fn test_global_coupon_applies() {
        let m = market(10_000, 5000, 10).await;

        m.db.coupons()
            .create(&Coupon {
                code: "SAVE10".to_string(),
                discount_percent: 10,
                product_id: None,
                category_id: None,
                expires_at: Utc::now() + Duration::days(7),
            })
            .await
            .unwrap();

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 1)
            .await
            .unwrap();

        let receipt = m
            .db
            .checkout()
            .place_order(&m.buyer_id, Some("SAVE10"))
            .await
            .unwrap();

        assert_eq!(receipt.discount_cents, 500);
        assert_eq!(receipt.order_total_cents, 4500);
        assert_eq!(
            receipt.coupon,
            CouponOutcome::Applied {
                code: "SAVE10".to_string(),
                percent: 10
            }
        );

        // Seller is credited the discounted amount; the line records the
        // original unit price plus the discount taken
        assert_eq!(m.db.parties().balance(&m.payee_id).await.unwrap(), 4500);
        let lines = m.db.orders().lines_for_order(&receipt.order_id).await.unwrap();
        assert_eq!(lines[0].unit_price_cents, 5000);
        assert_eq!(lines[0].discount_cents, 500);
    }

    /// Scenario D: a product-scoped coupon for a product not in the cart
    /// applies but discounts nothing.
    #[tokio::test]
    async fn test_product_scoped_coupon_misses() {
        let m = market(10_000, 5000, 10).await;

        m.db.coupons()
            .create(&Coupon {
                code: "OTHER".to_string(),
                discount_percent: 10,
                product_id: Some("some-other-product".to_string()),
                category_id: None,
                expires_at: Utc::now() + Duration::days(7),
            })
            .await
            .unwrap();

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 1)
            .await
            .unwrap();

        let receipt = m
            .db
            .checkout()
            .place_order(&m.buyer_id, Some("OTHER"))
            .await
            .unwrap();

        assert_eq!(receipt.discount_cents, 0);
        assert_eq!(receipt.order_total_cents, 5000);
        assert!(matches!(receipt.coupon, CouponOutcome::Applied { .. }));
    }

    /// An unknown or expired code downgrades to no discount and reports
    /// Rejected so the caller clears its stored copy.
    #[tokio::test]
    async fn test_invalid_coupon_downgrades() {
        let m = market(10_000, 5000, 10).await;

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 1)
            .await
            .unwrap();

        let receipt = m
            .db
            .checkout()
            .place_order(&m.buyer_id, Some("GHOST"))
            .await
            .unwrap();

        assert_eq!(receipt.order_total_cents, 5000);
        assert_eq!(
            receipt.coupon,
            CouponOutcome::Rejected {
                code: "GHOST".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_cart_aborts() {
        let m = market(10_000, 5000, 10).await;

        let err = m
            .db
            .checkout()
            .place_order(&m.buyer_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert!(m
            .db
            .orders()
            .orders_for_buyer(&m.buyer_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_aborts_cleanly() {
        let m = market(1000, 2000, 10).await;

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 2)
            .await
            .unwrap();

        let err = m
            .db
            .checkout()
            .place_order(&m.buyer_id, None)
            .await
            .unwrap_err();

        match err {
            CheckoutError::InsufficientFunds {
                required_cents,
                available_cents,
            } => {
                assert_eq!(required_cents, 4000);
                assert_eq!(available_cents, 1000);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }

        assert_eq!(m.db.parties().balance(&m.buyer_id).await.unwrap(), 1000);
        let level = m
            .db
            .inventory()
            .get(&m.seller_id, &m.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity_on_hand, 10);
    }

    #[tokio::test]
    async fn test_unknown_buyer() {
        let m = market(1000, 2000, 10).await;
        let err = m
            .db
            .checkout()
            .place_order("nobody", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::BuyerNotFound(_)));
    }

    /// A multi-seller cart splits the settlement: one buyer debit, one
    /// credit per payee, and the amounts balance to the cent.
    #[tokio::test]
    async fn test_multi_seller_settlement_splits() {
        let m = market(100_000, 1500, 10).await;

        // Second seller with its own payee and offer on a second product
        let payee2 = m.db.parties().create_party("Stall", 0, None).await.unwrap();
        let seller2 = m.db.parties().register_seller(&payee2.id).await.unwrap();
        let product2 = Product {
            id: Uuid::new_v4().to_string(),
            category_id: "tools".to_string(),
            name: "Wrench".to_string(),
        };
        m.db.products().insert(&product2).await.unwrap();
        m.db.inventory()
            .set_offer(&seller2.id, &product2.id, 999, 5)
            .await
            .unwrap();

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 2)
            .await
            .unwrap();
        m.db.carts()
            .add_line(&m.buyer_id, &product2.id, &seller2.id, 3)
            .await
            .unwrap();

        let receipt = m
            .db
            .checkout()
            .place_order(&m.buyer_id, None)
            .await
            .unwrap();

        assert_eq!(receipt.order_total_cents, 2 * 1500 + 3 * 999);
        assert_eq!(receipt.seller_totals.len(), 2);
        assert_eq!(receipt.seller_totals[&m.payee_id], 3000);
        assert_eq!(receipt.seller_totals[&payee2.id], 2997);

        let credit_sum: i64 = receipt.seller_totals.values().sum();
        assert_eq!(credit_sum, receipt.order_total_cents);

        assert_eq!(m.db.parties().balance(&m.payee_id).await.unwrap(), 3000);
        assert_eq!(m.db.parties().balance(&payee2.id).await.unwrap(), 2997);
        assert_eq!(
            m.db.parties().balance(&m.buyer_id).await.unwrap(),
            100_000 - receipt.order_total_cents
        );

        assert_balance_matches_log(&m.db, &m.buyer_id).await;
        assert_balance_matches_log(&m.db, &m.payee_id).await;
        assert_balance_matches_log(&m.db, &payee2.id).await;
    }

    /// Saved-for-later lines survive the checkout that consumes the cart.
    #[tokio::test]
    async fn test_saved_for_later_untouched() {
        let m = market(10_000, 1000, 10).await;

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 3)
            .await
            .unwrap();
        m.db.carts()
            .move_to_saved(&m.buyer_id, &m.product_id, &m.seller_id, 1)
            .await
            .unwrap();

        m.db.checkout()
            .place_order(&m.buyer_id, None)
            .await
            .unwrap();

        assert!(m
            .db
            .carts()
            .lines_for_buyer(&m.buyer_id, true)
            .await
            .unwrap()
            .is_empty());
        let saved = m.db.carts().lines_for_buyer(&m.buyer_id, false).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].quantity, 1);
    }

    /// Retrying after success places a second order (checkout is not
    /// idempotent by design).
    #[tokio::test]
    async fn test_checkout_not_idempotent() {
        let m = market(10_000, 1000, 10).await;

        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 1)
            .await
            .unwrap();
        m.db.checkout().place_order(&m.buyer_id, None).await.unwrap();

        // Refill the cart and submit again: a distinct order, another debit
        m.db.carts()
            .add_line(&m.buyer_id, &m.product_id, &m.seller_id, 1)
            .await
            .unwrap();
        m.db.checkout().place_order(&m.buyer_id, None).await.unwrap();

        assert_eq!(
            m.db.orders().orders_for_buyer(&m.buyer_id).await.unwrap().len(),
            2
        );
        assert_eq!(m.db.parties().balance(&m.buyer_id).await.unwrap(), 8000);
    }

    #[tokio::test]
    async fn test_busy_maps_to_lock_timeout() {
        let err = CheckoutError::from(DbError::Busy);
        assert!(matches!(err, CheckoutError::LockTimeout));
    }

    /// Scenario E: two concurrent checkouts race for the last unit. Exactly
    /// one commits; the loser observes the decremented stock and gets
    /// InsufficientStock. Never both, never neither (modulo lock timeouts,
    /// which the generous busy timeout rules out here).
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_never_oversell() {
        let path = std::env::temp_dir().join(format!("bazaar-race-{}.db", Uuid::new_v4()));
        let config = DbConfig::new(&path)
            .max_connections(4)
            .busy_timeout(std::time::Duration::from_secs(10));
        let db = Database::new(config).await.unwrap();

        let payee = db.parties().create_party("Shop", 0, None).await.unwrap();
        let seller = db.parties().register_seller(&payee.id).await.unwrap();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: "books".to_string(),
            name: "Last Copy".to_string(),
        };
        db.products().insert(&product).await.unwrap();
        // One unit on the shelf
        db.inventory()
            .set_offer(&seller.id, &product.id, 2500, 1)
            .await
            .unwrap();

        let mut buyers = Vec::new();
        for name in ["Ada", "Grace"] {
            let buyer = db.parties().create_party(name, 10_000, None).await.unwrap();
            db.carts()
                .add_line(&buyer.id, &product.id, &seller.id, 1)
                .await
                .unwrap();
            buyers.push(buyer.id);
        }

        let mut handles = Vec::new();
        for buyer_id in buyers.clone() {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.checkout().place_order(&buyer_id, None).await
            }));
        }

        let mut committed = 0;
        let mut out_of_stock = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => committed += 1,
                Err(CheckoutError::InsufficientStock { shortages }) => {
                    assert_eq!(shortages[0].available, 0);
                    out_of_stock += 1;
                }
                Err(other) => panic!("unexpected checkout failure: {other:?}"),
            }
        }

        assert_eq!(committed, 1, "exactly one checkout must win the unit");
        assert_eq!(out_of_stock, 1);

        let level = db.inventory().get(&seller.id, &product.id).await.unwrap().unwrap();
        assert_eq!(level.quantity_on_hand, 0);

        // One buyer paid, the other didn't
        let mut balances: Vec<i64> = Vec::new();
        for buyer_id in &buyers {
            balances.push(db.parties().balance(buyer_id).await.unwrap());
        }
        balances.sort();
        assert_eq!(balances, vec![7500, 10_000]);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
