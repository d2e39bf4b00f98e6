use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{
    ControllerConfig, HealthConfig, PgConnectionConfig, SentryConfig, ValidationError,
};

/// Complete configuration of the operator process.
///
/// Loaded once at startup from the `configuration` directory and `APP_` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OperatorConfig {
    /// Postgres database the rows are written to.
    pub database: PgConnectionConfig,
    /// Reconcile loop settings.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Health and readiness endpoint.
    #[serde(default)]
    pub health: HealthConfig,
    /// Name attached to every log line, usually the pod name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Optional Sentry configuration for error tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentry: Option<SentryConfig>,
}

impl OperatorConfig {
    /// Validates the complete operator configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.controller.validate()?;
        self.health.validate()
    }
}

impl Config for OperatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
