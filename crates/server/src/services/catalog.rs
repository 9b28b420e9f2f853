//! Read-only catalog with a short-lived product cache.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use starshop_core::{CategoryId, ProductId};

use crate::db::{CatalogStore, RepositoryError};
use crate::models::{Category, Product};

/// Catalog lookups. Single products are cached for one minute.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
    cache: Cache<ProductId, Product>,
}

impl Catalog {
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(60))
            .build();

        Self { store, cache }
    }

    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn list_categories(&self) -> Result<Vec<Category>, RepositoryError> {
        self.store.list_categories().await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    pub async fn list_products(
        &self,
        category: Option<CategoryId>,
    ) -> Result<Vec<Product>, RepositoryError> {
        self.store.list_products(category).await
    }

    /// Get a product, served from cache when possible.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store fails.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        if let Some(product) = self.cache.get(&id).await {
            debug!("Cache hit for product");
            return Ok(Some(product));
        }

        let product = self.store.get_product(id).await?;
        if let Some(ref product) = product {
            self.cache.insert(id, product.clone()).await;
        }
        Ok(product)
    }
}
