use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::{BackoffConfig, ValidationError};

/// Settings of the reconcile loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerConfig {
    /// Namespace to watch. All namespaces are watched when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_namespace: Option<String>,
    /// Deadline, in milliseconds, for a single reconcile invocation.
    pub reconcile_timeout_ms: u64,
    /// Interval, in seconds, after which a converged resource is reconciled again.
    ///
    /// No periodic resync happens when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync_interval_secs: Option<u64>,
    /// Retry policy for failed reconciles.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reconcile_timeout_ms == 0 {
            return Err(ValidationError::ReconcileTimeoutZero);
        }

        self.backoff.validate()
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_secs.map(Duration::from_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            reconcile_timeout_ms: 30_000,
            resync_interval_secs: None,
            backoff: BackoffConfig::default(),
        }
    }
}
