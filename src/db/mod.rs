pub mod models;
pub mod sink;

pub use sink::SqliteSink;
