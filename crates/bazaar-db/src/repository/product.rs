//! # Product Repository
//!
//! Minimal product catalog operations.
//!
//! The settlement engine only consumes product identity and category (for
//! coupon scoping); descriptions, images, and search belong to the catalog
//! service in front of this crate.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use bazaar_core::Product;

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a product.
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query("INSERT INTO products (id, category_id, name) VALUES (?1, ?2, ?3)")
            .bind(&product.id)
            .bind(&product.category_id)
            .bind(&product.name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Gets a product by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, category_id, name FROM products WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Lists products in a category.
    pub async fn list_by_category(&self, category_id: &str) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, category_id, name FROM products WHERE category_id = ?1 ORDER BY name",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: "books".to_string(),
            name: "The Art of Settlement".to_string(),
        };
        db.products().insert(&product).await.unwrap();

        let found = db.products().get(&product.id).await.unwrap().unwrap();
        assert_eq!(found.name, product.name);
        assert_eq!(found.category_id, "books");

        let in_category = db.products().list_by_category("books").await.unwrap();
        assert_eq!(in_category.len(), 1);
    }
}
