//! # Coupon Repository
//!
//! Coupon storage and the resolver contract used by checkout: given an
//! optional code and an instant, produce a discount rule or report the code
//! invalid. Invalid is recoverable - the checkout proceeds undiscounted.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use bazaar_core::validation::{validate_coupon_code, validate_discount_percent};
use bazaar_core::Coupon;

/// Repository for coupon database operations.
#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    /// Creates a new CouponRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Inserts a coupon.
    ///
    /// Scope must be at most one of product / category; the schema repeats
    /// this as a CHECK constraint.
    pub async fn create(&self, coupon: &Coupon) -> DbResult<()> {
        validate_coupon_code(&coupon.code).map_err(DbError::Validation)?;
        validate_discount_percent(coupon.discount_percent).map_err(DbError::Validation)?;

        if coupon.product_id.is_some() && coupon.category_id.is_some() {
            return Err(DbError::Validation(
                bazaar_core::ValidationError::InvalidFormat {
                    field: "scope".to_string(),
                    reason: "coupon scope is at most one of product, category".to_string(),
                },
            ));
        }

        debug!(code = %coupon.code, percent = %coupon.discount_percent, "Creating coupon");

        sqlx::query(
            r#"
            INSERT INTO coupons (code, discount_percent, product_id, category_id, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&coupon.code)
        .bind(coupon.discount_percent as i64)
        .bind(&coupon.product_id)
        .bind(&coupon.category_id)
        .bind(coupon.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a coupon by code, regardless of expiry.
    pub async fn get(&self, code: &str) -> DbResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT code, discount_percent, product_id, category_id, expires_at
            FROM coupons
            WHERE code = ?1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }

    /// Resolves a code to a coupon valid at `now`.
    ///
    /// `None` means unknown or expired: the caller clears any stored code
    /// and continues without a discount. Deliberately not an error.
    pub async fn resolve(&self, code: &str, now: DateTime<Utc>) -> DbResult<Option<Coupon>> {
        let mut conn = self.pool.acquire().await?;
        Self::resolve_tx(&mut conn, code, now).await
    }

    // =========================================================================
    // Transaction-Scoped Operations
    // =========================================================================

    /// Same contract as [`resolve`](Self::resolve), on a caller-held
    /// connection so checkout resolves under its own lock. One lookup per
    /// checkout; no stacking.
    pub async fn resolve_tx(
        conn: &mut SqliteConnection,
        code: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT code, discount_percent, product_id, category_id, expires_at
            FROM coupons
            WHERE code = ?1 AND expires_at > ?2
            "#,
        )
        .bind(code)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(coupon)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;

    fn coupon(code: &str, percent: u8, expires_at: DateTime<Utc>) -> Coupon {
        Coupon {
            code: code.to_string(),
            discount_percent: percent,
            product_id: None,
            category_id: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_resolve_valid_coupon() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();

        db.coupons()
            .create(&coupon("SAVE10", 10, now + Duration::days(7)))
            .await
            .unwrap();

        let resolved = db.coupons().resolve("SAVE10", now).await.unwrap().unwrap();
        assert_eq!(resolved.discount_percent, 10);

        let rule = resolved.rule();
        assert!(rule.is_discount());
    }

    #[tokio::test]
    async fn test_resolve_expired_or_unknown() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();

        db.coupons()
            .create(&coupon("OLD", 25, now - Duration::days(1)))
            .await
            .unwrap();

        assert!(db.coupons().resolve("OLD", now).await.unwrap().is_none());
        assert!(db.coupons().resolve("NOPE", now).await.unwrap().is_none());

        // get() still sees the expired row
        assert!(db.coupons().get("OLD").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_double_scope() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut c = coupon("BOTH", 10, Utc::now() + Duration::days(1));
        c.product_id = Some("p1".to_string());
        c.category_id = Some("c1".to_string());

        let err = db.coupons().create(&c).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_inputs() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let expires = Utc::now() + Duration::days(1);

        assert!(db.coupons().create(&coupon("", 10, expires)).await.is_err());
        assert!(db.coupons().create(&coupon("ZERO", 0, expires)).await.is_err());

        db.coupons().create(&coupon("DUP", 10, expires)).await.unwrap();
        let err = db.coupons().create(&coupon("DUP", 10, expires)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}
