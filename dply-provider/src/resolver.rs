use std::sync::Arc;

use dply_config::shared::RetryConfig;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::k8s::{K8sError, PodClient, PodPhase, PodSummary, ResolvedPod};

/// Finds the pod an action runs against.
///
/// Pods show up late right after a rollout, so an empty listing is retried
/// with the configured backoff before giving up with [`ErrorKind::NoPodFound`].
#[derive(Clone)]
pub struct PodResolver {
    client: Arc<dyn PodClient>,
    retry: RetryConfig,
}

impl PodResolver {
    pub fn new(client: Arc<dyn PodClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Resolves a single pod of `namespace` matching `selector`.
    pub async fn resolve(&self, namespace: &str, selector: &str) -> ProviderResult<ResolvedPod> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error: Option<K8sError> = None;

        for attempt in 0..max_attempts {
            match self.client.list_pods(namespace, selector).await {
                Ok(pods) => {
                    if let Some(pod) = select_pod(&pods) {
                        let pod = ResolvedPod::from(pod);
                        info!(%pod, attempt = attempt + 1, "resolved target pod");

                        return Ok(pod);
                    }

                    debug!(
                        namespace,
                        selector,
                        listed = pods.len(),
                        "no eligible pod in listing"
                    );
                    last_error = None;
                }
                Err(err) => {
                    warn!(namespace, selector, error = %err, "failed to list pods");
                    last_error = Some(err);
                }
            }

            if attempt + 1 < max_attempts {
                let delay = self.retry.delay_after(attempt);
                warn!(
                    namespace,
                    selector,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "pod not resolved yet, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        match last_error {
            Some(err) => Err(ProviderError::from((
                ErrorKind::PodListFailed,
                "Listing pods failed",
                format!("{namespace}/{selector}: {err}"),
            ))),
            None => Err(ProviderError::from((
                ErrorKind::NoPodFound,
                "No pod matched the selector",
                format!("namespace {namespace}, selector {selector}, after {max_attempts} attempts"),
            ))),
        }
    }
}

/// Picks the pod to run against from a listing.
///
/// Terminating pods are ignored. Running pods win over the others and ties
/// go to the smallest name, so the same listing always yields the same pod.
pub fn select_pod(pods: &[PodSummary]) -> Option<&PodSummary> {
    pods.iter()
        .filter(|pod| !pod.terminating)
        .min_by(|a, b| {
            let a_running = a.phase == PodPhase::Running;
            let b_running = b.phase == PodPhase::Running;

            b_running.cmp(&a_running).then_with(|| a.name.cmp(&b.name))
        })
}
