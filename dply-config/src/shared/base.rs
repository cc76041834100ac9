use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The pod resolution retry policy allows no attempt at all.
    #[error("`pod_resolution_retry.max_attempts` cannot be zero")]
    MaxAttemptsZero,
    /// The backoff factor would shrink or freeze the delay.
    #[error("`pod_resolution_retry.backoff_factor` must be at least 1.0, got {0}")]
    InvalidBackoffFactor(f32),
    /// The operation timeout is zero.
    #[error("`operation_timeout_secs` cannot be zero")]
    OperationTimeoutZero,
    /// A PEM bundle was supplied but TLS is disabled.
    #[error("Invalid TLS config: `trusted_root_certs` is set but `enabled` is false")]
    TrustedRootCertsWithoutTls,
}
