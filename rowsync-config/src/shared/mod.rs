mod backoff;
mod base;
mod connection;
mod controller;
mod health;
mod operator;
mod sentry;

pub use backoff::*;
pub use base::*;
pub use connection::*;
pub use controller::*;
pub use health::*;
pub use operator::*;
pub use sentry::*;
