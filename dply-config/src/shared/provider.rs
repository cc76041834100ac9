use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// Settings shared by the pod action providers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Backoff policy for finding the target pod.
    #[serde(default)]
    pub pod_resolution_retry: RetryConfig,
    /// Upper bound, in seconds, on the exec or tunnel + SQL part of a create.
    ///
    /// Pod resolution is bounded separately by [`ProviderConfig::pod_resolution_retry`].
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_operation_timeout_secs() -> u64 {
    300
}

impl ProviderConfig {
    /// Returns the operation timeout as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Validates the [`ProviderConfig`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pod_resolution_retry.validate()?;

        if self.operation_timeout_secs == 0 {
            return Err(ValidationError::OperationTimeoutZero);
        }

        Ok(())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            pod_resolution_retry: RetryConfig::default(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}
