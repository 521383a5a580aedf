use serde_json::Value;

use crate::types::{walk, Cell, ListingRecord};

/// How a raw value is coerced once it has been unwrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Strings pass through; numbers and booleans are rendered as text.
    Text,
    /// Numbers pass through; numeric strings are parsed.
    Number,
    /// Stored as compact JSON text, whatever its shape.
    Opaque,
}

/// Fields kept from each search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingField {
    ItemId,
    Title,
    Url,
    Country,
    Price,
    PostalCode,
    Condition,
    ListedAt,
    CategoryId,
}

impl ListingField {
    pub const ALL: [ListingField; 9] = [
        ListingField::ItemId,
        ListingField::Title,
        ListingField::Url,
        ListingField::Country,
        ListingField::Price,
        ListingField::PostalCode,
        ListingField::Condition,
        ListingField::ListedAt,
        ListingField::CategoryId,
    ];

    /// Key path inside one search result. Every step may be list-wrapped.
    pub fn path(self) -> &'static [&'static str] {
        match self {
            ListingField::ItemId => &["itemId"],
            ListingField::Title => &["title"],
            ListingField::Url => &["viewItemURL"],
            ListingField::Country => &["country"],
            ListingField::Price => &["sellingStatus", "convertedCurrentPrice", "__value__"],
            ListingField::PostalCode => &["postalCode"],
            ListingField::Condition => &["condition"],
            ListingField::ListedAt => &["listingInfo", "startTime"],
            ListingField::CategoryId => &["primaryCategory", "categoryId"],
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            ListingField::Price => FieldKind::Number,
            ListingField::Condition => FieldKind::Opaque,
            _ => FieldKind::Text,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ListingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ListingField::ItemId => "item_id",
            ListingField::Title => "title",
            ListingField::Url => "url",
            ListingField::Country => "country",
            ListingField::Price => "price",
            ListingField::PostalCode => "postal_code",
            ListingField::Condition => "condition",
            ListingField::ListedAt => "listed_at",
            ListingField::CategoryId => "category_id",
        };
        write!(f, "{s}")
    }
}

/// Extract one field from every record of a page.
///
/// The result always has one value per input record, in input order.
/// Records without the field yield [`Cell::Missing`].
pub fn flatten(page: &[Value], field: ListingField) -> Vec<Cell> {
    page.iter().map(|record| extract(record, field)).collect()
}

fn extract(record: &Value, field: ListingField) -> Cell {
    let Some(value) = walk(record, field.path()) else {
        return Cell::Missing;
    };
    match field.kind() {
        FieldKind::Text => text_cell(value),
        FieldKind::Number => number_cell(value),
        FieldKind::Opaque => Cell::Text(value.to_string()),
    }
}

fn text_cell(v: &Value) -> Cell {
    match v {
        Value::String(s) => Cell::Text(s.clone()),
        Value::Number(n) => Cell::Text(n.to_string()),
        Value::Bool(b) => Cell::Text(b.to_string()),
        _ => Cell::Missing,
    }
}

fn number_cell(v: &Value) -> Cell {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() => Cell::Number(n),
        _ => Cell::Missing,
    }
}

/// Column-oriented listing data for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingTable {
    columns: Vec<Vec<Cell>>,
    len: usize,
}

impl Default for ListingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ListingTable {
    pub fn new() -> Self {
        Self {
            columns: vec![Vec::new(); ListingField::ALL.len()],
            len: 0,
        }
    }

    /// Flatten a page. Each column is extracted on its own before the table
    /// is assembled.
    pub fn from_page(page: &[Value]) -> Self {
        let columns = ListingField::ALL
            .iter()
            .map(|&field| flatten(page, field))
            .collect();
        Self {
            columns,
            len: page.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column(&self, field: ListingField) -> &[Cell] {
        &self.columns[field.index()]
    }

    /// Concatenate another page's columns below this table's.
    pub fn append(&mut self, other: ListingTable) {
        for (col, more) in self.columns.iter_mut().zip(other.columns) {
            col.extend(more);
        }
        self.len += other.len;
    }

    pub fn records(&self) -> Vec<ListingRecord> {
        let cell = |field: ListingField, i: usize| self.columns[field.index()][i].clone();
        (0..self.len)
            .map(|i| ListingRecord {
                item_id: cell(ListingField::ItemId, i),
                title: cell(ListingField::Title, i),
                url: cell(ListingField::Url, i),
                country: cell(ListingField::Country, i),
                price: cell(ListingField::Price, i),
                postal_code: cell(ListingField::PostalCode, i),
                condition: cell(ListingField::Condition, i),
                listed_at: cell(ListingField::ListedAt, i),
                category_id: cell(ListingField::CategoryId, i),
            })
            .collect()
    }
}
