//! # Repository Module
//!
//! Database repository implementations for Bazaar.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Request handler                                                        │
//! │       │                                                                 │
//! │       │  db.carts().add_line(buyer, product, seller, 2)                │
//! │       ▼                                                                 │
//! │  CartRepository ──► SQL ──► SQLite                                     │
//! │                                                                         │
//! │  Pool-scoped methods are self-contained operations. Methods named      │
//! │  *_tx (plus lock_and_read) take a caller-held connection and exist     │
//! │  for the checkout module, which composes them into one atomic unit.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`party::PartyRepository`] - Parties, sellers, balances, transaction log
//! - [`product::ProductRepository`] - Minimal product catalog
//! - [`inventory::InventoryRepository`] - Offers: price and stock per (seller, product)
//! - [`cart::CartRepository`] - Cart and saved-for-later lines
//! - [`coupon::CouponRepository`] - Coupons and the resolver contract
//! - [`order::OrderRepository`] - Orders, lines, fulfillment roll-up

pub mod cart;
pub mod coupon;
pub mod inventory;
pub mod order;
pub mod party;
pub mod product;
