//! Helpers shared by unit and integration tests.
//!
//! Provides builders for `PostgresWriter` objects, a [`store::FaultyRowStore`] that records and
//! fails row store calls on demand, and local Postgres databases for integration tests.
pub mod database;
pub mod resource;
pub mod store;
