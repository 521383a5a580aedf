pub mod api;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod merge;
pub mod pipeline;
pub mod types;
pub mod xml;
