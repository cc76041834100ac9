use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Server name checked against the database certificate when none is given.
///
/// The SQL client always dials the local end of a tunnel.
pub const DEFAULT_TLS_SERVER_NAME: &str = "localhost";

/// Credentials used to log into a Postgres database reached through a tunnel.
///
/// Equality compares values, password included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgCredentials {
    /// Role to authenticate as.
    pub user: String,
    /// Database to connect to.
    pub database: String,
    /// Password for `user`. Redacted in debug output.
    pub password: SerializableSecretString,
}

/// TLS settings for the SQL session opened through a tunnel.
///
/// With TLS enabled and no trusted roots, the session is encrypted but the
/// server certificate is not verified. In-cluster databases typically serve
/// self-signed certificates for their service name, which never matches the
/// tunnel's local address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Whether TLS is required for the connection.
    #[serde(default = "default_tls_enabled")]
    pub enabled: bool,
    /// PEM-encoded trusted root certificates. Empty means "do not verify".
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Name to verify the server certificate against.
    #[serde(default)]
    pub server_name: Option<String>,
}

fn default_tls_enabled() -> bool {
    true
}

impl TlsConfig {
    /// A TLS configuration that encrypts without verifying the server.
    pub fn require() -> Self {
        Self {
            enabled: true,
            trusted_root_certs: String::new(),
            server_name: None,
        }
    }

    /// A configuration for plaintext sessions.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            trusted_root_certs: String::new(),
            server_name: None,
        }
    }

    /// Returns whether the server certificate chain is verified.
    pub fn verifies_server(&self) -> bool {
        self.enabled && !self.trusted_root_certs.trim().is_empty()
    }

    /// Returns the name the server certificate is verified against.
    pub fn server_name(&self) -> &str {
        self.server_name
            .as_deref()
            .unwrap_or(DEFAULT_TLS_SERVER_NAME)
    }

    /// Validates the [`TlsConfig`].
    ///
    /// Supplying roots while TLS is disabled is almost certainly a mistake and
    /// is rejected.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.enabled && !self.trusted_root_certs.trim().is_empty() {
            return Err(ValidationError::TrustedRootCertsWithoutTls);
        }

        Ok(())
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::require()
    }
}
