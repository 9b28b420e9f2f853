//! Catalog domain types.

use rust_decimal::Decimal;
use serde::Serialize;

use starshop_core::{CategoryId, ProductId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// A purchasable consultation or item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub title: String,
    /// Price in the shop currency. Never negative.
    pub price: Decimal,
    pub description: Option<String>,
    pub image_url: Option<String>,
}
