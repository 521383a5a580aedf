pub mod detail;
pub mod listing;

pub use detail::{extract_details, hash_seller_id};
pub use listing::{flatten, ListingField, ListingTable};
