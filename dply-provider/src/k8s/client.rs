use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams, ListParams, Portforwarder};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use crate::encryption::install_crypto_provider_once;
use crate::k8s::{K8sError, PodClient, PodClientFactory, PodPhase, PodSummary, ResolvedPod, TunnelStream};

/// [`PodClient`] backed by the [`kube`] crate.
#[derive(Clone)]
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Builds a client from a kubeconfig YAML document.
    ///
    /// The current context of the document is used.
    pub async fn from_kube_config(kube_config: &str) -> Result<Self, K8sError> {
        install_crypto_provider_once();

        let kubeconfig = Kubeconfig::from_yaml(kube_config)?;
        let config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        let client = Client::try_from(config)?;

        Ok(Self { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn summarize(pod: &Pod, namespace: &str) -> Option<PodSummary> {
    let name = pod.metadata.name.clone()?;
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(PodPhase::from)
        .unwrap_or(PodPhase::Unknown);

    Some(PodSummary {
        name,
        namespace: pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| namespace.to_owned()),
        phase,
        terminating: pod.metadata.deletion_timestamp.is_some(),
    })
}

/// An exec session that cannot be opened (unknown container, refused
/// upgrade) fails the action itself.
fn exec_open_error(err: kube::Error) -> K8sError {
    K8sError::Exec(format!("the exec session could not be opened: {err}"))
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodSummary>, K8sError> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;

        Ok(pods
            .items
            .iter()
            .filter_map(|pod| summarize(pod, namespace))
            .collect())
    }

    async fn exec(
        &self,
        pod: &ResolvedPod,
        container: &str,
        command: &[String],
    ) -> Result<Option<Status>, K8sError> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods(&pod.namespace)
            .exec(&pod.name, command.to_vec(), &params)
            .await
            .map_err(exec_open_error)?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let forward_stdout = async move {
            match stdout {
                Some(mut reader) => tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await,
                None => Ok(0),
            }
        };
        let forward_stderr = async move {
            match stderr {
                Some(mut reader) => tokio::io::copy(&mut reader, &mut tokio::io::stderr()).await,
                None => Ok(0),
            }
        };
        let wait_status = async move {
            match status {
                Some(status) => status.await,
                None => None,
            }
        };

        let (stdout_result, stderr_result, status) =
            tokio::join!(forward_stdout, forward_stderr, wait_status);

        // Losing operator output does not change the outcome of the command.
        if let Err(err) = stdout_result {
            warn!(error = %err, "failed to forward exec stdout");
        }
        if let Err(err) = stderr_result {
            warn!(error = %err, "failed to forward exec stderr");
        }

        attached
            .join()
            .await
            .map_err(|err| K8sError::Exec(err.to_string()))?;

        debug!(pod = %pod, container, "exec session closed");

        Ok(status)
    }

    async fn port_forward(
        &self,
        pod: &ResolvedPod,
        port: u16,
    ) -> Result<Box<dyn TunnelStream>, K8sError> {
        let mut forwarder = self
            .pods(&pod.namespace)
            .portforward(&pod.name, &[port])
            .await?;

        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| K8sError::PortForward {
                port,
                reason: "no stream was opened for the port".to_owned(),
            })?;

        Ok(Box::new(ForwardedStream {
            inner: stream,
            _forwarder: forwarder,
        }))
    }
}

pin_project! {
    /// A port-forward stream that keeps its forwarder alive for as long as it
    /// is in use.
    struct ForwardedStream<S> {
        #[pin]
        inner: S,
        _forwarder: Portforwarder,
    }
}

impl<S: AsyncRead> AsyncRead for ForwardedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for ForwardedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// [`PodClientFactory`] building a [`KubePodClient`] per credential blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubePodClientFactory;

#[async_trait]
impl PodClientFactory for KubePodClientFactory {
    async fn connect(&self, kube_config: &str) -> Result<Arc<dyn PodClient>, K8sError> {
        let client = KubePodClient::from_kube_config(kube_config).await?;
        Ok(Arc::new(client))
    }
}
