//! # bazaar-db: Database Layer for Bazaar
//!
//! This crate provides database access for the Bazaar settlement engine.
//! It uses SQLite for storage with sqlx for async operations, and owns the
//! one piece of the system with real invariants: the checkout transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Bazaar Data Flow                                 │
//! │                                                                         │
//! │  Request handler (checkout endpoint)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     bazaar-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌───────────────┐   ┌──────────────┐    │   │
//! │  │   │   Database    │   │  Repositories │   │   Checkout   │    │   │
//! │  │   │   (pool.rs)   │◄──│ party, cart,  │◄──│ orchestrator │    │   │
//! │  │   │   SqlitePool  │   │ inventory,    │   │ (the atomic  │    │   │
//! │  │   │   migrations  │   │ coupon, order │   │  core)       │    │   │
//! │  │   └───────────────┘   └───────────────┘   └──────────────┘    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL mode, foreign keys, busy timeout)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (party, inventory, cart, ...)
//! - [`checkout`] - The checkout orchestrator and its error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bazaar_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/bazaar.db")).await?;
//!
//! db.carts().add_line(&buyer_id, &product_id, &seller_id, 2).await?;
//! let receipt = db.checkout().place_order(&buyer_id, Some("SAVE10")).await?;
//! println!("order {} settled", receipt.order_id);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use checkout::{CheckoutError, CheckoutOrchestrator, CheckoutReceipt, CouponOutcome};
pub use error::DbError;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cart::CartRepository;
pub use repository::coupon::CouponRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::order::OrderRepository;
pub use repository::party::PartyRepository;
pub use repository::product::ProductRepository;
