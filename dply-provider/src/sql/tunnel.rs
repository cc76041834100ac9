use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, info, warn};

use crate::error::{ErrorKind, ProviderResult};
use crate::k8s::{PodClient, ResolvedPod};
use crate::provider_error;

/// A local TCP endpoint forwarding every connection to a port of a pod.
///
/// The listener binds an OS-assigned port on the loopback interface. Each
/// accepted connection gets its own port-forward stream. The tunnel is owned
/// by the caller and must be released with [`PortForwardTunnel::close`],
/// which stops accepting, aborts the open bridges and waits for the
/// background task to finish.
#[derive(Debug)]
pub struct PortForwardTunnel {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<()>,
    forward_error_rx: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl PortForwardTunnel {
    /// Binds the local end and starts accepting connections for `pod:port`.
    pub async fn open(
        client: Arc<dyn PodClient>,
        pod: ResolvedPod,
        port: u16,
    ) -> ProviderResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|err| {
                provider_error!(
                    ErrorKind::TunnelSetupFailed,
                    "Could not bind the local end of the tunnel",
                    err
                )
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (forward_error_tx, forward_error_rx) = watch::channel(None);

        info!(%pod, port, %local_addr, "tunnel opened");

        let span = tracing::info_span!("tunnel", %pod, port);
        let task = tokio::spawn(
            accept_loop(listener, client, pod, port, shutdown_rx, forward_error_tx).instrument(span),
        );

        Ok(Self {
            local_addr,
            shutdown_tx,
            forward_error_rx,
            task,
        })
    }

    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The last failure to open a port-forward stream, if any.
    ///
    /// A client of the tunnel only sees its connection being closed when the
    /// forward fails, this tells why.
    pub fn forward_error(&self) -> Option<String> {
        self.forward_error_rx.borrow().clone()
    }

    /// Stops the tunnel and waits for its background task.
    pub async fn close(self) {
        // The task may already be gone, in which case nobody listens anymore.
        let _ = self.shutdown_tx.send(());

        if let Err(err) = self.task.await {
            warn!(error = %err, "tunnel task did not finish cleanly");
        }

        info!(local_addr = %self.local_addr, "tunnel closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    client: Arc<dyn PodClient>,
    pod: ResolvedPod,
    port: u16,
    mut shutdown_rx: watch::Receiver<()>,
    forward_error_tx: watch::Sender<Option<String>>,
) {
    let forward_error_tx = Arc::new(forward_error_tx);
    let mut bridges = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                break;
            }

            Some(_) = bridges.join_next(), if !bridges.is_empty() => {}

            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "failed to accept tunnel connection");
                        continue;
                    }
                };

                debug!(%peer, "accepted tunnel connection");
                bridges.spawn(
                    bridge(socket, client.clone(), pod.clone(), port, forward_error_tx.clone())
                        .in_current_span(),
                );
            }
        }
    }

    bridges.shutdown().await;
}

async fn bridge(
    mut socket: TcpStream,
    client: Arc<dyn PodClient>,
    pod: ResolvedPod,
    port: u16,
    forward_error_tx: Arc<watch::Sender<Option<String>>>,
) {
    let mut remote = match client.port_forward(&pod, port).await {
        Ok(remote) => remote,
        Err(err) => {
            warn!(error = %err, "failed to open port-forward stream");
            forward_error_tx.send_replace(Some(err.to_string()));
            return;
        }
    };

    match copy_bidirectional(&mut socket, &mut remote).await {
        Ok((sent, received)) => debug!(sent, received, "tunnel connection finished"),
        Err(err) => debug!(error = %err, "tunnel connection broke"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::k8s::MockPodClient;
    use crate::test_utils::net::{spawn_echo_server, unused_addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pod() -> ResolvedPod {
        ResolvedPod {
            name: "timescale-0".to_owned(),
            namespace: "timescale".to_owned(),
        }
    }

    #[tokio::test]
    async fn bytes_flow_through_the_tunnel() {
        let (target, _server) = spawn_echo_server().await;
        let client = MockPodClient::new().with_forward_target(target);

        let tunnel = PortForwardTunnel::open(Arc::new(client.clone()), pod(), 5432)
            .await
            .unwrap();
        assert!(tunnel.local_addr().ip().is_loopback());
        assert_ne!(tunnel.local_addr().port(), 0);

        let mut stream = TcpStream::connect(tunnel.local_addr()).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(stream);
        tunnel.close().await;

        assert_eq!(client.port_forward_calls().len(), 1);
    }

    #[tokio::test]
    async fn forward_failures_are_recorded() {
        let client = MockPodClient::new().with_forward_target(unused_addr().await);
        let tunnel = PortForwardTunnel::open(Arc::new(client), pod(), 5432)
            .await
            .unwrap();

        let mut stream = TcpStream::connect(tunnel.local_addr()).await.unwrap();
        let mut buf = [0u8; 1];
        // The bridge drops the socket once the forward fails.
        let read = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(read, 0);

        assert!(tunnel.forward_error().unwrap().contains("5432"));
        tunnel.close().await;
    }

    #[tokio::test]
    async fn close_stops_accepting() {
        let (target, _server) = spawn_echo_server().await;
        let client = MockPodClient::new().with_forward_target(target);
        let tunnel = PortForwardTunnel::open(Arc::new(client), pod(), 5432)
            .await
            .unwrap();
        let addr = tunnel.local_addr();

        tunnel.close().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
