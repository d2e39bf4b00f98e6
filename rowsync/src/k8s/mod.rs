//! Access to `PostgresWriter` objects on the API server.

mod base;
pub mod http;
pub mod memory;

pub use base::*;
