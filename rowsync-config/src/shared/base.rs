use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// Per-reconcile deadline cannot be zero.
    #[error("`reconcile_timeout_ms` cannot be zero")]
    ReconcileTimeoutZero,
    /// Backoff must start with a positive delay.
    #[error("`initial_delay_ms` cannot be zero")]
    BackoffInitialDelayZero,
    /// Backoff must not shrink between attempts.
    #[error("`backoff_factor` must be at least 1.0, got {0}")]
    BackoffFactorTooSmall(f32),
    /// Backoff ceiling lies below its starting delay.
    #[error("`max_delay_ms` ({max_delay_ms}) must not be lower than `initial_delay_ms` ({initial_delay_ms})")]
    BackoffMaxBelowInitial {
        initial_delay_ms: u64,
        max_delay_ms: u64,
    },
    /// The health endpoint port cannot be zero.
    #[error("`health.port` cannot be zero")]
    HealthPortZero,
}
