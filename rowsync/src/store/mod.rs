//! Row stores mirroring `PostgresWriter` resources.

mod base;
pub mod memory;
pub mod postgres;

pub use base::*;
