use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::types::{child, walk, Cell, DetailRecord, RawValue};

const RESPONSE_ROOT: &str = "GetMultipleItemsResponse";

/// Irreversibly hash a seller user id. Only the digest is ever kept.
pub fn hash_seller_id(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Flatten the detail responses of one category.
///
/// `responses` holds one converted response per batch. Rows come out in
/// batch order, then in item order within the batch. A response with no
/// items contributes nothing; an item without its category or item id is
/// fatal because the row could never be joined back to its listing.
pub fn extract_details(responses: &[Value]) -> Result<Vec<DetailRecord>> {
    let mut rows = Vec::new();

    for (group, response) in responses.iter().enumerate() {
        let Some(body) = child(response, RESPONSE_ROOT) else {
            warn!(group, "detail response has no {RESPONSE_ROOT} root, skipping");
            continue;
        };

        if child(body, "Ack").and_then(Value::as_str) == Some("Failure") {
            warn!(group, error = %upstream_message(body), "detail call failed upstream, skipping");
            continue;
        }

        let Some(items) = body.get("Item").filter(|v| !v.is_null()) else {
            debug!(group, "detail response carries no items");
            continue;
        };

        for (index, item) in RawValue::classify(items).items().iter().enumerate() {
            rows.push(extract_item(item, group, index)?);
        }
    }

    Ok(rows)
}

fn extract_item(item: &Value, group: usize, index: usize) -> Result<DetailRecord> {
    let required = |field: &'static str| {
        child(item, field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(AppError::MissingKey { field, group, index })
    };

    let category_id = required("PrimaryCategoryID")?;
    let item_id = required("ItemID")?;

    let item_specifics = child(item, "ItemSpecifics")
        .and_then(|s| s.get("NameValueList"))
        .filter(|v| !v.is_null())
        .map(|v| Cell::Text(v.to_string()))
        .unwrap_or(Cell::Missing);

    let seller_id = walk(item, &["Seller", "UserID"])
        .and_then(Value::as_str)
        .map(|raw| Cell::Text(hash_seller_id(raw)))
        .unwrap_or(Cell::Missing);

    let sku = child(item, "SKU").and_then(Value::as_str).map(str::to_string);

    Ok(DetailRecord {
        item_id,
        category_id,
        item_specifics,
        seller_id,
        sku,
        image_url: first_image(item),
    })
}

/// Exactly one image per item: the scalar itself, or the first of a list.
fn first_image(item: &Value) -> Cell {
    item.get("PictureURL")
        .map(RawValue::classify)
        .and_then(RawValue::first)
        .and_then(Value::as_str)
        .map(Cell::text)
        .unwrap_or(Cell::Missing)
}

fn upstream_message(body: &Value) -> String {
    child(body, "Errors")
        .and_then(|e| child(e, "LongMessage").or_else(|| child(e, "ShortMessage")))
        .and_then(Value::as_str)
        .unwrap_or("no error message")
        .to_string()
}
