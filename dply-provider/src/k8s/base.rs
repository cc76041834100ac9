use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ErrorKind, ProviderError};

/// Errors emitted by the Kubernetes integration.
#[derive(Debug, Error)]
pub enum K8sError {
    /// The credential blob could not be turned into a client configuration.
    #[error("An error occurred while loading the kubeconfig: {0}")]
    KubeConfig(#[from] kube::config::KubeconfigError),
    /// An error returned by the [`kube`] client when talking to the API server.
    #[error("An error occurred with kube when dealing with K8s: {0}")]
    Kube(#[from] kube::Error),
    /// The exec session broke before reporting a status.
    #[error("The exec session failed: {0}")]
    Exec(String),
    /// The port-forward session could not be established or broke.
    #[error("Port-forward to port {port} failed: {reason}")]
    PortForward { port: u16, reason: String },
    /// Any other transport failure.
    #[error("The cluster could not be reached: {0}")]
    Transport(String),
}

impl From<K8sError> for ProviderError {
    fn from(err: K8sError) -> ProviderError {
        match err {
            K8sError::KubeConfig(_) => ProviderError::from((
                ErrorKind::InvalidKubeConfig,
                "Cluster credentials are invalid",
                err.to_string(),
            )),
            K8sError::Exec(_) => ProviderError::from((
                ErrorKind::ExecFailed,
                "Exec session failed",
                err.to_string(),
            )),
            K8sError::PortForward { .. } => ProviderError::from((
                ErrorKind::TunnelSetupFailed,
                "Port-forward failed",
                err.to_string(),
            )),
            K8sError::Kube(_) | K8sError::Transport(_) => ProviderError::from((
                ErrorKind::KubeError,
                "Kubernetes API call failed",
                err.to_string(),
            )),
        }
    }
}

/// A simplified view of a pod phase.
///
/// Unknown values map to [`PodPhase::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(value: &str) -> Self {
        match value {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// The parts of a listed pod the resolver looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    /// Whether the pod has a deletion timestamp.
    pub terminating: bool,
}

/// The pod an action runs against.
///
/// Recomputed on every create, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPod {
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for ResolvedPod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&PodSummary> for ResolvedPod {
    fn from(pod: &PodSummary) -> Self {
        Self {
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
        }
    }
}

/// A bidirectional byte stream to a port inside a pod.
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Client interface describing the Kubernetes operations the providers need.
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Lists the pods of `namespace` matching the `key=value` label `selector`.
    async fn list_pods(&self, namespace: &str, selector: &str)
    -> Result<Vec<PodSummary>, K8sError>;

    /// Runs `command` in `container` of `pod` and waits for its terminal status.
    ///
    /// Stdin is not attached. Stdout and stderr of the remote process are
    /// streamed to the local process' own stdout and stderr. Returns `None`
    /// if the session ended without a status.
    async fn exec(
        &self,
        pod: &ResolvedPod,
        container: &str,
        command: &[String],
    ) -> Result<Option<Status>, K8sError>;

    /// Opens a new stream to `port` of `pod`.
    ///
    /// Each call opens an independent stream. Dropping the stream closes it.
    async fn port_forward(
        &self,
        pod: &ResolvedPod,
        port: u16,
    ) -> Result<Box<dyn TunnelStream>, K8sError>;
}

/// Builds a [`PodClient`] from an opaque cluster credential blob.
#[async_trait]
pub trait PodClientFactory: Send + Sync {
    async fn connect(&self, kube_config: &str) -> Result<Arc<dyn PodClient>, K8sError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_phases_map_to_unknown() {
        assert_eq!(PodPhase::from("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from("Evicted"), PodPhase::Unknown);
    }

    #[test]
    fn errors_map_to_provider_kinds() {
        let err: ProviderError = K8sError::PortForward {
            port: 5432,
            reason: "connection refused".to_owned(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TunnelSetupFailed);
        assert!(err.detail().unwrap().contains("5432"));

        let err: ProviderError = K8sError::Transport("EOF".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::KubeError);
    }

    #[test]
    fn resolved_pod_displays_namespace_first() {
        let pod = ResolvedPod {
            name: "timescale-0".to_owned(),
            namespace: "timescale".to_owned(),
        };
        assert_eq!(pod.to_string(), "timescale/timescale-0");
    }
}
