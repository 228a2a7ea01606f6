pub mod config;
pub mod error;
pub mod matrix;
pub mod query;
