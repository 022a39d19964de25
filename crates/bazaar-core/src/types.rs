//! # Domain Types
//!
//! Core domain types used throughout Bazaar.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Party       │   │     Order       │   │ BalanceTxn      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (rowid)     │       │
//! │  │  balance_cents  │   │  buyer_id       │   │  party_id       │       │
//! │  │  address        │   │  status         │   │  amount_cents   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ InventoryLevel  │   │    CartLine     │   │     Coupon      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  (seller, prod) │   │  buyer + line   │   │  code (unique)  │       │
//! │  │  price_cents    │   │  quantity       │   │  percent, scope │       │
//! │  │  qty_on_hand    │   │  is_in_cart     │   │  expires_at     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Party Identity
//! Buyers and seller payees are both a `Party`: an account holder with a
//! mutable balance and an append-only transaction log. A `Seller` is a
//! distinct identity that links back to the party receiving its credits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Party
// =============================================================================

/// An account holder with a mutable balance (buyer or seller payee).
///
/// Invariant: `balance_cents >= 0` after every committed transaction.
/// The only writer of `balance_cents` is the settlement step of checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Party {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Current balance in cents. Equals the signed sum of this party's
    /// balance transactions at all times.
    pub balance_cents: i64,

    /// Shipping address, snapshotted onto orders at checkout. Sellers that
    /// never buy can leave this unset.
    pub shipping_address: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Party {
    /// Returns the balance as a Money type.
    #[inline]
    pub fn balance(&self) -> Money {
        Money::from_cents(self.balance_cents)
    }
}

// =============================================================================
// Seller
// =============================================================================

/// A seller identity. Credits for its sold items settle to `party_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Seller {
    /// Unique identifier (UUID v4). Inventory and order lines key on this,
    /// not on the payee party.
    pub id: String,

    /// The party credited when this seller's items sell.
    pub party_id: String,
}

// =============================================================================
// Product
// =============================================================================

/// A product listed in the marketplace.
///
/// Display metadata lives with the catalog service; the settlement engine
/// only needs identity and the category for coupon scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Category, used by category-scoped coupons.
    pub category_id: String,

    /// Display name.
    pub name: String,
}

// =============================================================================
// Inventory Level
// =============================================================================

/// One seller's offer of one product: price and stock on hand.
///
/// Invariant: `quantity_on_hand >= 0`; decremented only inside a committed
/// checkout transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryLevel {
    pub seller_id: String,
    pub product_id: String,

    /// Offer price in cents.
    pub price_cents: i64,

    /// Units on hand.
    pub quantity_on_hand: i64,

    /// Last write, maintained by offer updates and checkout decrements.
    pub updated_at: DateTime<Utc>,
}

impl InventoryLevel {
    /// Returns the offer price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Cart Line
// =============================================================================

/// One (product, seller) pairing in a buyer's cart or saved-for-later list.
///
/// Ephemeral: the in-cart subset is consumed destructively by a successful
/// checkout. Saved-for-later lines (`is_in_cart == false`) are untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CartLine {
    pub buyer_id: String,
    pub product_id: String,
    pub seller_id: String,
    pub quantity: i64,
    pub is_in_cart: bool,
}

// =============================================================================
// Coupon
// =============================================================================

/// A discount coupon. Read-only to the settlement engine.
///
/// At most one of `product_id` / `category_id` is set; both unset means the
/// coupon applies to every line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Coupon {
    /// Unique coupon code (what the buyer types in).
    pub code: String,

    /// Discount percentage, 1-100.
    pub discount_percent: u8,

    /// Product scope, if product-scoped.
    pub product_id: Option<String>,

    /// Category scope, if category-scoped.
    pub category_id: Option<String>,

    /// Valid strictly before this instant.
    pub expires_at: DateTime<Utc>,
}

impl Coupon {
    /// Checks validity at an externally supplied instant.
    #[inline]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Returns the scope of this coupon.
    ///
    /// Product scope wins if both columns are somehow populated; the schema
    /// forbids that state.
    pub fn scope(&self) -> CouponScope {
        if let Some(pid) = &self.product_id {
            CouponScope::Product(pid.clone())
        } else if let Some(cid) = &self.category_id {
            CouponScope::Category(cid.clone())
        } else {
            CouponScope::Global
        }
    }

    /// Converts to the discount rule applied at checkout.
    pub fn rule(&self) -> DiscountRule {
        DiscountRule {
            percent: self.discount_percent,
            scope: self.scope(),
        }
    }
}

// =============================================================================
// Discount Rule
// =============================================================================

/// The applicability restriction of a discount rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponScope {
    /// Applies to every line.
    Global,
    /// Applies only to lines for this product.
    Product(String),
    /// Applies only to lines for products in this category.
    Category(String),
}

/// A resolved discount: percentage plus scope. `DiscountRule::none()` is the
/// identity rule used when no coupon is in play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRule {
    /// Discount percentage, 0-100. Zero means no discount.
    pub percent: u8,

    pub scope: CouponScope,
}

impl DiscountRule {
    /// The no-discount rule.
    pub const fn none() -> Self {
        DiscountRule {
            percent: 0,
            scope: CouponScope::Global,
        }
    }

    /// Whether this rule discounts anything at all.
    #[inline]
    pub fn is_discount(&self) -> bool {
        self.percent > 0
    }

    /// Applicability test for one line.
    ///
    /// `Global` always applies; `Product(pid)` applies iff `pid` matches the
    /// line's product; `Category(cid)` applies iff `cid` matches the line's
    /// product category.
    pub fn applies_to(&self, product_id: &str, category_id: &str) -> bool {
        match &self.scope {
            CouponScope::Global => true,
            CouponScope::Product(pid) => pid == product_id,
            CouponScope::Category(cid) => cid == category_id,
        }
    }
}

impl Default for DiscountRule {
    fn default() -> Self {
        DiscountRule::none()
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// The fulfillment status of an order.
///
/// Checkout creates orders as `Pending`; fulfillment events (sellers marking
/// their lines shipped) drive the transitions, never checkout itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// No line fulfilled yet.
    Pending,
    /// Some, but not all, lines fulfilled.
    Partial,
    /// Every line fulfilled.
    Fulfilled,
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

// =============================================================================
// Order
// =============================================================================

/// A committed order. Created exactly once per checkout commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub buyer_id: String,

    /// Buyer's shipping address at the moment of checkout (snapshot).
    pub shipping_address: Option<String>,

    pub status: OrderStatus,

    pub placed_at: DateTime<Utc>,

    /// Set when status becomes `Fulfilled`.
    pub fulfilled_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Order Line
// =============================================================================

/// One (product, seller) pairing within an order.
///
/// Immutable once created except for `fulfilled_at`. Prices are snapshots:
/// later inventory repricing never changes a committed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub order_id: String,
    pub product_id: String,
    pub seller_id: String,
    pub quantity: i64,

    /// Unit price at time of sale, before discount.
    pub unit_price_cents: i64,

    /// Discount applied to this whole line (not per unit).
    pub discount_cents: i64,

    /// Set when the seller marks this line fulfilled.
    pub fulfilled_at: Option<DateTime<Utc>>,
}

impl OrderLine {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// The amount this line settled for: `unit_price * quantity - discount`.
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity) - Money::from_cents(self.discount_cents)
    }
}

// =============================================================================
// Balance Transaction
// =============================================================================

/// One entry in a party's append-only balance audit log.
///
/// Negative amounts are debits (a buyer paying for an order), positive are
/// credits (a seller payee receiving its share). The signed sum of a party's
/// transactions equals its current balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BalanceTransaction {
    /// Monotonic log id (database rowid).
    pub id: i64,

    pub party_id: String,

    /// Signed amount in cents.
    pub amount_cents: i64,

    /// The order this entry settles, when applicable.
    pub order_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl BalanceTransaction {
    /// Returns the signed amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Cart Line Snapshot
// =============================================================================

/// One cart line joined with live inventory, as observed under the checkout
/// lock. This is the input to pricing and stock validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CartLineSnapshot {
    pub product_id: String,
    pub seller_id: String,

    /// Party credited for this line at settlement.
    pub payee_id: String,

    /// Product category, for coupon scoping.
    pub category_id: String,

    /// Units requested by the buyer.
    pub quantity: i64,

    /// Seller's current unit price in cents.
    pub unit_price_cents: i64,

    /// Seller's current stock, read under lock.
    pub quantity_on_hand: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
