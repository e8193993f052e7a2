//! PriceFeeder Library
//!
//! Multi-provider price oracle: polls exchanges, filters outliers and
//! serves one canonical USD price per base symbol.

pub mod config;
pub mod error;
pub mod oracle;
pub mod types;

pub use error::OracleError;
pub use oracle::{Oracle, PriceFeeder};
