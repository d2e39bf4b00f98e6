use serde::{Deserialize, Serialize};

/// Sentry error reporting configuration.
///
/// Only the DSN is configurable; the environment and release are derived at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Sentry DSN (Data Source Name) errors are reported to.
    pub dsn: String,
}
