//! Postgres helpers shared by the rowsync crates.
//!
//! [`schema`] holds the validated, quotable table name the rows are written to. With the
//! `test-utils` feature, [`tokio::test_utils`] provides throwaway databases for integration tests.

pub mod schema;
#[cfg(feature = "test-utils")]
pub mod tokio;
