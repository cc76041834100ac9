use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use tokio::net::TcpStream;

use crate::k8s::{
    K8sError, PodClient, PodClientFactory, PodPhase, PodSummary, ResolvedPod, TunnelStream,
};

/// A call received by a [`MockPodClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodCall {
    ListPods {
        namespace: String,
        selector: String,
    },
    Exec {
        pod: ResolvedPod,
        container: String,
        command: Vec<String>,
    },
    PortForward {
        pod: ResolvedPod,
        port: u16,
    },
}

/// One scripted answer to `list_pods`. `Err` holds the transport error text.
pub type Listing = Result<Vec<PodSummary>, String>;

struct Inner {
    scripted_listings: VecDeque<Listing>,
    listing: Vec<PodSummary>,
    exec_status: Option<Status>,
    forward_target: Option<SocketAddr>,
    calls: Vec<PodCall>,
}

/// In-memory [`PodClient`].
///
/// Scripted listings are served first, in order, then every call returns the
/// default listing. Clones share their state.
#[derive(Clone)]
pub struct MockPodClient {
    inner: Arc<Mutex<Inner>>,
}

impl MockPodClient {
    /// A client whose cluster has no pods and whose exec calls succeed.
    pub fn new() -> Self {
        let inner = Inner {
            scripted_listings: VecDeque::new(),
            listing: Vec::new(),
            exec_status: Some(success_status()),
            forward_target: None,
            calls: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Sets the listing returned once the scripted listings are used up.
    pub fn with_pods(self, pods: Vec<PodSummary>) -> Self {
        self.inner.lock().unwrap().listing = pods;
        self
    }

    /// Queues a listing served before the default one.
    pub fn push_listing(&self, listing: Listing) {
        self.inner.lock().unwrap().scripted_listings.push_back(listing);
    }

    /// Sets the status reported by exec calls. `None` ends sessions without one.
    pub fn with_exec_status(self, status: Option<Status>) -> Self {
        self.inner.lock().unwrap().exec_status = status;
        self
    }

    /// Forwards port-forward streams to `target`.
    ///
    /// Without a target, port-forward calls fail.
    pub fn with_forward_target(self, target: SocketAddr) -> Self {
        self.inner.lock().unwrap().forward_target = Some(target);
        self
    }

    pub fn calls(&self) -> Vec<PodCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PodCall::ListPods { .. }))
            .count()
    }

    pub fn exec_calls(&self) -> Vec<PodCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, PodCall::Exec { .. }))
            .collect()
    }

    pub fn port_forward_calls(&self) -> Vec<PodCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, PodCall::PortForward { .. }))
            .collect()
    }
}

impl Default for MockPodClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PodClient for MockPodClient {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodSummary>, K8sError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(PodCall::ListPods {
            namespace: namespace.to_owned(),
            selector: selector.to_owned(),
        });

        match inner.scripted_listings.pop_front() {
            Some(Ok(pods)) => Ok(pods),
            Some(Err(err)) => Err(K8sError::Transport(err)),
            None => Ok(inner.listing.clone()),
        }
    }

    async fn exec(
        &self,
        pod: &ResolvedPod,
        container: &str,
        command: &[String],
    ) -> Result<Option<Status>, K8sError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(PodCall::Exec {
            pod: pod.clone(),
            container: container.to_owned(),
            command: command.to_vec(),
        });

        Ok(inner.exec_status.clone())
    }

    async fn port_forward(
        &self,
        pod: &ResolvedPod,
        port: u16,
    ) -> Result<Box<dyn TunnelStream>, K8sError> {
        let target = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(PodCall::PortForward {
                pod: pod.clone(),
                port,
            });
            inner.forward_target
        };

        let Some(target) = target else {
            return Err(K8sError::PortForward {
                port,
                reason: "no forward target configured".to_owned(),
            });
        };

        let stream = TcpStream::connect(target)
            .await
            .map_err(|err| K8sError::PortForward {
                port,
                reason: err.to_string(),
            })?;

        Ok(Box::new(stream))
    }
}

/// [`PodClientFactory`] handing out a shared [`MockPodClient`].
#[derive(Clone)]
pub struct MockPodClientFactory {
    client: MockPodClient,
    connected: Arc<Mutex<Vec<String>>>,
    reject: bool,
}

impl MockPodClientFactory {
    pub fn new(client: MockPodClient) -> Self {
        Self {
            client,
            connected: Arc::new(Mutex::new(Vec::new())),
            reject: false,
        }
    }

    /// A factory that cannot reach any cluster.
    pub fn unreachable() -> Self {
        Self {
            reject: true,
            ..Self::new(MockPodClient::new())
        }
    }

    /// Credential blobs passed to `connect`, in call order.
    pub fn connected_with(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodClientFactory for MockPodClientFactory {
    async fn connect(&self, kube_config: &str) -> Result<Arc<dyn PodClient>, K8sError> {
        self.connected.lock().unwrap().push(kube_config.to_owned());

        if self.reject {
            return Err(K8sError::Transport("cluster unreachable".to_owned()));
        }

        Ok(Arc::new(self.client.clone()))
    }
}

/// A running, non-terminating pod.
pub fn running_pod(namespace: &str, name: &str) -> PodSummary {
    pod(namespace, name, PodPhase::Running)
}

pub fn pod(namespace: &str, name: &str, phase: PodPhase) -> PodSummary {
    PodSummary {
        name: name.to_owned(),
        namespace: namespace.to_owned(),
        phase,
        terminating: false,
    }
}

/// The status the API server sends when a command exits with code 0.
pub fn success_status() -> Status {
    Status {
        status: Some("Success".to_owned()),
        ..Status::default()
    }
}

/// The status the API server sends when a command exits with a non-zero code.
pub fn failure_status(message: &str) -> Status {
    Status {
        status: Some("Failure".to_owned()),
        message: Some(message.to_owned()),
        reason: Some("NonZeroExitCode".to_owned()),
        ..Status::default()
    }
}
