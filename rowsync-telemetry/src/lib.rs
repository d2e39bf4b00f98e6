//! Tracing setup shared by the operator binary and the test suites.

pub mod tracing;
