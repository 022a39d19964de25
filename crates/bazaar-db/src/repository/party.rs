//! # Party Repository
//!
//! Database operations for parties (balance holders) and seller identities.
//!
//! ## Balance Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every balance mutation is paired with an append-only transaction      │
//! │  log entry, inside the same atomic unit:                               │
//! │                                                                         │
//! │    adjust_balance_tx(party, -4000)  +  record_transaction_tx(-4000)    │
//! │                                                                         │
//! │  Audit invariant (checked by tests, §transactions table):              │
//! │    parties.balance_cents == SUM(transactions.amount_cents)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use bazaar_core::{BalanceTransaction, Party, Seller};

/// Repository for party and seller database operations.
#[derive(Debug, Clone)]
pub struct PartyRepository {
    pool: SqlitePool,
}

impl PartyRepository {
    /// Creates a new PartyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PartyRepository { pool }
    }

    /// Creates a party with an opening balance.
    ///
    /// A nonzero opening balance is recorded as an opening credit in the
    /// transaction log, keeping the audit invariant intact from day one.
    pub async fn create_party(
        &self,
        name: &str,
        opening_balance_cents: i64,
        shipping_address: Option<&str>,
    ) -> DbResult<Party> {
        if opening_balance_cents < 0 {
            return Err(DbError::Validation(
                bazaar_core::ValidationError::MustBePositive {
                    field: "opening_balance_cents".to_string(),
                },
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(id = %id, name = %name, "Creating party");

        let party = Party {
            id: id.clone(),
            name: name.to_string(),
            balance_cents: opening_balance_cents,
            shipping_address: shipping_address.map(String::from),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO parties (id, name, balance_cents, shipping_address, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&party.id)
        .bind(&party.name)
        .bind(party.balance_cents)
        .bind(&party.shipping_address)
        .bind(party.created_at)
        .bind(party.updated_at)
        .execute(&mut *tx)
        .await?;

        if opening_balance_cents > 0 {
            sqlx::query(
                r#"
                INSERT INTO transactions (party_id, amount_cents, order_id, created_at)
                VALUES (?1, ?2, NULL, ?3)
                "#,
            )
            .bind(&party.id)
            .bind(opening_balance_cents)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(party)
    }

    /// Gets a party by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Party>> {
        let party = sqlx::query_as::<_, Party>(
            r#"
            SELECT id, name, balance_cents, shipping_address, created_at, updated_at
            FROM parties
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(party)
    }

    /// Gets a party's current balance in cents.
    pub async fn balance(&self, id: &str) -> DbResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance_cents FROM parties WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        balance.ok_or_else(|| DbError::not_found("Party", id))
    }

    /// Registers a party as a seller. The party becomes the payee for the
    /// new seller identity's sales.
    pub async fn register_seller(&self, party_id: &str) -> DbResult<Seller> {
        let seller = Seller {
            id: Uuid::new_v4().to_string(),
            party_id: party_id.to_string(),
        };

        debug!(seller_id = %seller.id, party_id = %party_id, "Registering seller");

        sqlx::query("INSERT INTO sellers (id, party_id) VALUES (?1, ?2)")
            .bind(&seller.id)
            .bind(&seller.party_id)
            .execute(&self.pool)
            .await?;

        Ok(seller)
    }

    /// Gets a seller by ID.
    pub async fn get_seller(&self, id: &str) -> DbResult<Option<Seller>> {
        let seller =
            sqlx::query_as::<_, Seller>("SELECT id, party_id FROM sellers WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(seller)
    }

    /// Gets the seller identity registered for a party, if any.
    pub async fn seller_for_party(&self, party_id: &str) -> DbResult<Option<Seller>> {
        let seller =
            sqlx::query_as::<_, Seller>("SELECT id, party_id FROM sellers WHERE party_id = ?1")
                .bind(party_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(seller)
    }

    /// Gets a party's balance transactions, newest first.
    pub async fn transactions_for_party(
        &self,
        party_id: &str,
    ) -> DbResult<Vec<BalanceTransaction>> {
        let txns = sqlx::query_as::<_, BalanceTransaction>(
            r#"
            SELECT id, party_id, amount_cents, order_id, created_at
            FROM transactions
            WHERE party_id = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(party_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(txns)
    }

    // =========================================================================
    // Transaction-Scoped Operations
    // =========================================================================
    // These run on a caller-held connection and must execute inside the
    // checkout transaction; they are never atomic on their own.

    /// Applies a signed delta to a party's balance.
    ///
    /// The schema's `balance_cents >= 0` CHECK backs the funds validation:
    /// a debit past zero fails the statement rather than corrupting state.
    pub async fn adjust_balance_tx(
        conn: &mut SqliteConnection,
        party_id: &str,
        delta_cents: i64,
    ) -> DbResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE parties
            SET balance_cents = balance_cents + ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(party_id)
        .bind(delta_cents)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Party", party_id));
        }

        Ok(())
    }

    /// Appends a signed entry to a party's balance transaction log.
    pub async fn record_transaction_tx(
        conn: &mut SqliteConnection,
        party_id: &str,
        amount_cents: i64,
        order_id: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (party_id, amount_cents, order_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(party_id)
        .bind(amount_cents)
        .bind(order_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
