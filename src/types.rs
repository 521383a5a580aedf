use serde_json::Value;

use crate::config::MISSING_SENTINEL;

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

/// A raw response node, classified once at the boundary.
///
/// Both upstream APIs wrap values inconsistently: the search endpoint puts
/// almost every scalar in a one-element array, and the XML detail endpoint
/// yields an array only when an element repeats. Extractors never look at
/// the JSON type themselves; they go through this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    Scalar(&'a Value),
    List(&'a [Value]),
}

impl<'a> RawValue<'a> {
    pub fn classify(v: &'a Value) -> Self {
        match v {
            Value::Array(items) => RawValue::List(items),
            other => RawValue::Scalar(other),
        }
    }

    /// The scalar itself, or the first element of a list.
    pub fn first(self) -> Option<&'a Value> {
        match self {
            RawValue::Scalar(v) => Some(v),
            RawValue::List(items) => items.first(),
        }
    }

    /// Every element, treating a scalar as a list of one.
    pub fn items(self) -> &'a [Value] {
        match self {
            RawValue::Scalar(v) => std::slice::from_ref(v),
            RawValue::List(items) => items,
        }
    }
}

/// Look up `key` and unwrap one level of list wrapping.
/// `null` counts as absent.
pub fn child<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    let raw = v.get(key)?;
    RawValue::classify(raw).first().filter(|x| !x.is_null())
}

/// Walk `path`, unwrapping one level of list wrapping at every step.
pub fn walk<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |node, key| child(node, key))
}

// ---------------------------------------------------------------------------
// Flattened values
// ---------------------------------------------------------------------------

/// One flattened field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    /// The field was absent from the raw record.
    Missing,
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Missing => write!(f, "{MISSING_SENTINEL}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One listing from the search endpoint, after flattening.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub item_id: Cell,
    pub title: Cell,
    pub url: Cell,
    pub country: Cell,
    pub price: Cell,
    pub postal_code: Cell,
    pub condition: Cell,
    pub listed_at: Cell,
    pub category_id: Cell,
}

/// Supplemental per-item data from the detail endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    pub item_id: String,
    pub category_id: String,
    pub item_specifics: Cell,
    /// SHA-256 hex of the seller's user id. The raw id is never stored.
    pub seller_id: Cell,
    /// Absent SKU is a normal business value, not an extraction failure.
    pub sku: Option<String>,
    pub image_url: Cell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_distinguishes_lists() {
        let list = json!(["a", "b"]);
        let scalar = json!("a");
        assert!(matches!(RawValue::classify(&list), RawValue::List(items) if items.len() == 2));
        assert!(matches!(RawValue::classify(&scalar), RawValue::Scalar(_)));
    }

    #[test]
    fn first_of_empty_list_is_none() {
        let empty = json!([]);
        assert_eq!(RawValue::classify(&empty).first(), None);
        assert!(RawValue::classify(&empty).items().is_empty());
    }

    #[test]
    fn walk_unwraps_every_step() {
        let record = json!({
            "sellingStatus": [{"convertedCurrentPrice": [{"@currencyId": "USD", "__value__": "12.5"}]}]
        });
        let price = walk(&record, &["sellingStatus", "convertedCurrentPrice", "__value__"]);
        assert_eq!(price, Some(&json!("12.5")));
    }

    #[test]
    fn walk_accepts_unwrapped_nodes() {
        let record = json!({"listingInfo": {"startTime": "2022-01-10T17:00:00.000Z"}});
        assert_eq!(
            walk(&record, &["listingInfo", "startTime"]),
            Some(&json!("2022-01-10T17:00:00.000Z"))
        );
        assert_eq!(walk(&record, &["listingInfo", "endTime"]), None);
    }

    #[test]
    fn null_is_absent() {
        let record = json!({"SKU": null});
        assert_eq!(child(&record, "SKU"), None);
    }

    #[test]
    fn missing_displays_as_sentinel() {
        assert_eq!(Cell::Missing.to_string(), MISSING_SENTINEL);
        assert_eq!(Cell::text("x").to_string(), "x");
    }
}
