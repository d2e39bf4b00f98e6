//! Keeps one Postgres row per `PostgresWriter` custom resource.
//!
//! The [`reconciler::Reconciler`] drives a single resource to convergence against a
//! [`store::RowStore`], using a finalizer so the row is removed before the resource disappears.
//! [`controller::Operator`] hosts the reconciler inside a kube-runtime controller.

pub mod concurrency;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod k8s;
mod macros;
pub mod reconciler;
pub mod resource;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
