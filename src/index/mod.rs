pub mod cache;
pub mod indexer;
