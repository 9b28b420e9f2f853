//! Seed the catalog from a YAML file.
//!
//! # File Format
//!
//! ```yaml
//! categories:
//!   - name: Tea
//!     products:
//!       - title: Sencha
//!         price: "100.00"
//!         description: Green tea from Shizuoka
//!         image_url: https://cdn.example.com/sencha.jpg
//! ```
//!
//! Categories are matched by name; products already present in their
//! category under the same title are skipped, so reruns are safe.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use starshop_server::db;

use super::database_url;

#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    pub categories: Vec<CategorySeed>,
}

#[derive(Debug, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    #[serde(default)]
    pub products: Vec<ProductSeed>,
}

#[derive(Debug, Deserialize)]
pub struct ProductSeed {
    pub title: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Outcome of a seeding run.
#[derive(Debug, Default)]
pub struct SeedResult {
    pub categories: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Collect every problem in the file instead of stopping at the first.
pub fn validate_catalog(catalog: &CatalogFile) -> Vec<String> {
    let mut errors = Vec::new();
    for category in &catalog.categories {
        if category.name.trim().is_empty() {
            errors.push("category with empty name".to_string());
        }
        for product in &category.products {
            if product.title.trim().is_empty() {
                errors.push(format!("{}: product with empty title", category.name));
            }
            if product.price <= Decimal::ZERO {
                errors.push(format!(
                    "{}/{}: price must be positive, got {}",
                    category.name, product.title, product.price
                ));
            }
        }
    }
    errors
}

/// Insert categories and products from `file_path`.
///
/// # Errors
///
/// Returns an error if the file is missing or invalid, or a database
/// operation fails. Nothing is written unless the whole file validates.
pub async fn catalog(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading catalog from file");
    let content = tokio::fs::read_to_string(path).await?;
    let catalog: CatalogFile = serde_yaml::from_str(&content)?;

    let errors = validate_catalog(&catalog);
    if !errors.is_empty() {
        error!("Catalog validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    let pool = db::create_pool(&database_url()?).await?;
    info!("Connected to database");

    let mut tx = pool.begin().await?;
    let mut result = SeedResult::default();

    for category in &catalog.categories {
        let category_id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO categories (name) VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            ",
        )
        .bind(category.name.trim())
        .fetch_one(&mut *tx)
        .await?;
        result.categories += 1;

        for product in &category.products {
            let inserted = sqlx::query(
                r"
                INSERT INTO products (category_id, title, price, description, image_url)
                SELECT $1, $2, $3, $4, $5
                WHERE NOT EXISTS (
                    SELECT 1 FROM products WHERE category_id = $1 AND title = $2
                )
                ",
            )
            .bind(category_id)
            .bind(product.title.trim())
            .bind(product.price)
            .bind(product.description.as_deref())
            .bind(product.image_url.as_deref())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 0 {
                result.skipped += 1;
            } else {
                result.inserted += 1;
            }
        }
    }

    tx.commit().await?;

    info!("Seeding complete!");
    info!("  Categories: {}", result.categories);
    info!("  Products inserted: {}", result.inserted);
    info!("  Products skipped (already exist): {}", result.skipped);
    Ok(())
}
