//! Row types for the `item_specs` table (see migrations/0001_item_specs.sql).

use crate::types::Cell;

/// One merged listing + detail row, in the persisted column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    pub item_id: String,
    pub title: Cell,
    pub listing_url: Cell,
    pub category_id: String,
    pub price: Cell,
    pub item_condition: Cell,
    pub listing_time: Cell,
    pub item_specifics: Cell,
    pub seller_id: Cell,
    pub country: Cell,
    pub zip_code: Cell,
    pub image_url: Cell,
    /// NULL when the seller set no SKU; never the missing-field sentinel.
    pub sku: Option<String>,
    pub fetched_at: String,
}

/// Read-back view of the text columns, returned by `SqliteSink::stored_items`.
#[derive(Debug, sqlx::FromRow)]
pub struct StoredItemRow {
    pub item_id: String,
    pub title: Option<String>,
    pub category_id: String,
    pub seller_id: Option<String>,
    pub image_url: Option<String>,
    pub sku: Option<String>,
    pub fetched_at: String,
}
