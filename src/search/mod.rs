pub mod engine;
pub mod query;
pub mod translations;
