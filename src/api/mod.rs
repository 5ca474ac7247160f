//! REST api used for gateway discovery

mod client;
mod error;
pub mod types;

pub use client::{Client, BASE_URL};
pub use error::Error;

/// Result type for api module
pub type Result<T> = std::result::Result<T, Error>;
