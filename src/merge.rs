use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::config::MISSING_SENTINEL;
use crate::db::models::ItemRow;
use crate::error::{AppError, Result};
use crate::types::{DetailRecord, ListingRecord};

/// Listings that can take part in the join: those with an item id, first
/// occurrence only. Returns the kept records and how many were dropped.
pub fn joinable_listings(records: Vec<ListingRecord>) -> (Vec<ListingRecord>, usize) {
    let total = records.len();
    let mut seen = HashSet::new();
    let kept: Vec<ListingRecord> = records
        .into_iter()
        .filter(|r| match r.item_id.as_text() {
            Some(id) => seen.insert(id.to_string()),
            None => false,
        })
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Join listings with their detail rows by item id.
///
/// Fails without producing any rows if the two sides differ in length, if a
/// listing has no detail row, or if a detail id repeats. Output follows
/// listing order.
pub fn merge(
    listings: &[ListingRecord],
    details: &[DetailRecord],
    fetched_at: &str,
) -> Result<Vec<ItemRow>> {
    if listings.len() != details.len() {
        return Err(AppError::Alignment {
            listings: listings.len(),
            details: details.len(),
        });
    }

    let mut by_id: HashMap<&str, &DetailRecord> = HashMap::with_capacity(details.len());
    for detail in details {
        if by_id.insert(detail.item_id.as_str(), detail).is_some() {
            return Err(AppError::DuplicateItem(detail.item_id.clone()));
        }
    }

    let mut rows = Vec::with_capacity(listings.len());
    for listing in listings {
        let id = listing
            .item_id
            .as_text()
            .ok_or_else(|| AppError::UnmatchedItem(MISSING_SENTINEL.to_string()))?;
        let detail = by_id
            .remove(id)
            .ok_or_else(|| AppError::UnmatchedItem(id.to_string()))?;

        if listing.category_id.as_text() != Some(detail.category_id.as_str()) {
            warn!(
                item_id = id,
                listing_category = %listing.category_id,
                detail_category = %detail.category_id,
                "category mismatch between search and detail, keeping detail value"
            );
        }

        rows.push(ItemRow {
            item_id: id.to_string(),
            title: listing.title.clone(),
            listing_url: listing.url.clone(),
            category_id: detail.category_id.clone(),
            price: listing.price.clone(),
            item_condition: listing.condition.clone(),
            listing_time: listing.listed_at.clone(),
            item_specifics: detail.item_specifics.clone(),
            seller_id: detail.seller_id.clone(),
            country: listing.country.clone(),
            zip_code: listing.postal_code.clone(),
            image_url: detail.image_url.clone(),
            sku: detail.sku.clone(),
            fetched_at: fetched_at.to_string(),
        });
    }

    Ok(rows)
}
