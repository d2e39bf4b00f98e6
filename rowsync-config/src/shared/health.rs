use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Address the health and readiness endpoints listen on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Interface to bind, e.g. `0.0.0.0`.
    pub host: String,
    pub port: u16,
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::HealthPortZero);
        }

        Ok(())
    }

    /// Returns `host:port` suitable for binding a listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}
