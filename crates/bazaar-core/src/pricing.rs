//! # Pricing Module
//!
//! The pure half of the checkout state machine: given the cart snapshot
//! observed under lock and the resolved discount rule, compute every number
//! the commit step will write. No I/O, no clock, fully deterministic.
//!
//! ## Where This Sits in Checkout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   Started ──► Locked ──► Priced ──► Validated ──► Committed             │
//! │                  │          │            │                              │
//! │                  │          │            └── stock_shortages() (here)   │
//! │                  │          └── price_cart()          (here)            │
//! │                  └── snapshot read        (bazaar-db)                   │
//! │                                                                         │
//! │   Money in must equal money out:                                        │
//! │     order_total == Σ line_total == Σ seller_totals                      │
//! │   price_cart() guarantees this by construction - totals are sums of    │
//! │   the same per-line values, never recomputed independently.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::types::{CartLineSnapshot, DiscountRule};

// =============================================================================
// Priced Line
// =============================================================================

/// One cart line with its pricing fully resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: String,
    pub seller_id: String,

    /// Party credited for this line at settlement.
    pub payee_id: String,

    pub quantity: i64,

    /// Unit price at time of sale, before discount.
    pub unit_price_cents: i64,

    /// `unit_price * quantity`, before discount.
    pub line_subtotal_cents: i64,

    /// Discount applied to this whole line; zero when the rule does not
    /// apply to the line.
    pub line_discount_cents: i64,

    /// `line_subtotal - line_discount`; what the buyer pays for the line.
    pub line_total_cents: i64,
}

// =============================================================================
// Priced Cart
// =============================================================================

/// The complete pricing of a cart: every line plus the totals settlement
/// will write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,

    /// Amount debited from the buyer: `Σ line_total`.
    pub order_total_cents: i64,

    /// Amount credited per seller payee, keyed by payee party id.
    /// BTreeMap so settlement iterates payees in a stable order.
    pub seller_totals: BTreeMap<String, i64>,
}

impl PricedCart {
    /// Returns the order total as Money.
    #[inline]
    pub fn order_total(&self) -> Money {
        Money::from_cents(self.order_total_cents)
    }

    /// Total discount across all lines.
    pub fn total_discount_cents(&self) -> i64 {
        self.lines.iter().map(|l| l.line_discount_cents).sum()
    }
}

/// Prices every line of the snapshot under one discount rule.
///
/// Per line: `subtotal = unit_price * qty`; the discount is the floor of
/// `subtotal * percent / 100` when the rule applies to the line, else zero.
/// At most one rule is in play per checkout (no stacking).
pub fn price_cart(snapshot: &[CartLineSnapshot], rule: &DiscountRule) -> PricedCart {
    let mut lines = Vec::with_capacity(snapshot.len());
    let mut order_total = Money::zero();
    let mut seller_totals: BTreeMap<String, i64> = BTreeMap::new();

    for line in snapshot {
        let unit_price = Money::from_cents(line.unit_price_cents);
        let subtotal = unit_price.multiply_quantity(line.quantity);

        let discount = if rule.is_discount() && rule.applies_to(&line.product_id, &line.category_id)
        {
            subtotal.discount_amount(rule.percent)
        } else {
            Money::zero()
        };

        let total = subtotal - discount;

        order_total += total;
        *seller_totals.entry(line.payee_id.clone()).or_insert(0) += total.cents();

        lines.push(PricedLine {
            product_id: line.product_id.clone(),
            seller_id: line.seller_id.clone(),
            payee_id: line.payee_id.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
            line_subtotal_cents: subtotal.cents(),
            line_discount_cents: discount.cents(),
            line_total_cents: total.cents(),
        });
    }

    PricedCart {
        lines,
        order_total_cents: order_total.cents(),
        seller_totals,
    }
}

// =============================================================================
// Stock Validation
// =============================================================================

/// One line whose requested quantity exceeds the stock observed under lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub product_id: String,
    pub seller_id: String,
    pub requested: i64,
    pub available: i64,
}

/// Collects every line short on stock.
///
/// Deliberately does not short-circuit: the caller reports all offending
/// lines in one error, not just the first.
pub fn stock_shortages(snapshot: &[CartLineSnapshot]) -> Vec<StockShortage> {
    snapshot
        .iter()
        .filter(|line| line.quantity > line.quantity_on_hand)
        .map(|line| StockShortage {
            product_id: line.product_id.clone(),
            seller_id: line.seller_id.clone(),
            requested: line.quantity,
            available: line.quantity_on_hand,
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
