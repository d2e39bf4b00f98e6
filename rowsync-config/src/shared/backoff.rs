use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Exponential backoff applied to a resource after a failed reconcile.
///
/// Retries never give up; the delay grows by `backoff_factor` after each consecutive failure
/// of the same resource and is capped at `max_delay_ms`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackoffConfig {
    /// Delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between retries.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each consecutive failure.
    pub backoff_factor: f32,
}

impl BackoffConfig {
    /// Validates the backoff parameters.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.initial_delay_ms == 0 {
            return Err(ValidationError::BackoffInitialDelayZero);
        }

        // Written negated so that NaN is rejected as well.
        if !(self.backoff_factor >= 1.0) {
            return Err(ValidationError::BackoffFactorTooSmall(self.backoff_factor));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ValidationError::BackoffMaxBelowInitial {
                initial_delay_ms: self.initial_delay_ms,
                max_delay_ms: self.max_delay_ms,
            });
        }

        Ok(())
    }

    /// Returns the delay to wait after `consecutive_failures` failures in a row.
    ///
    /// The first failure waits `initial_delay_ms`.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * (self.backoff_factor as f64).powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay_ms as f64);

        Duration::from_millis(capped_ms as u64)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_is_capped() {
        let config = BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_factor: 2.0,
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(4), Duration::from_millis(800));
        assert_eq!(config.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_failures_uses_initial_delay() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_millis(500));
    }

    #[test]
    fn rejects_invalid_parameters() {
        let mut config = BackoffConfig::default();
        config.initial_delay_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::BackoffInitialDelayZero)
        );

        let mut config = BackoffConfig::default();
        config.backoff_factor = 0.5;
        assert_eq!(
            config.validate(),
            Err(ValidationError::BackoffFactorTooSmall(0.5))
        );

        let mut config = BackoffConfig::default();
        config.max_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::BackoffMaxBelowInitial { .. })
        ));

        assert!(BackoffConfig::default().validate().is_ok());
    }
}
