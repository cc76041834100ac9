//! Running a command inside a pod as a declarative resource.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dply_config::shared::ProviderConfig;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::bail;
use crate::contract::{
    CheckFailure, CheckResult, CreateResult, DiffResult, ResourceProvider, to_record,
};
use crate::error::{ErrorKind, ProviderResult};
use crate::identity::{concatenated, exec_identity};
use crate::k8s::{PodClient, PodClientFactory, ResolvedPod};
use crate::resolver::PodResolver;

/// Inputs of an exec action.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecInputs {
    pub namespace: String,
    /// `key=value` label selector of the target pod.
    pub pod_selector: String,
    /// Kubeconfig YAML of the cluster.
    ///
    /// Callers may leave it out of persisted inputs, it never takes part in a diff.
    #[serde(default)]
    pub kube_config: String,
    pub container: String,
    #[serde(default)]
    pub cmd: Vec<String>,
}

impl fmt::Debug for ExecInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecInputs")
            .field("namespace", &self.namespace)
            .field("pod_selector", &self.pod_selector)
            .field("kube_config", &"[REDACTED]")
            .field("container", &self.container)
            .field("cmd", &self.cmd)
            .finish()
    }
}

/// Runs a command in a container of a pod selected by label.
///
/// The command runs once per create. A command that exits non-zero fails the
/// create and is never retried, since commands are not assumed idempotent.
pub struct PodExecutor {
    factory: Arc<dyn PodClientFactory>,
    config: ProviderConfig,
}

impl PodExecutor {
    pub fn new(factory: Arc<dyn PodClientFactory>, config: ProviderConfig) -> Self {
        Self { factory, config }
    }

    async fn run(
        &self,
        client: &dyn PodClient,
        pod: &ResolvedPod,
        inputs: &ExecInputs,
    ) -> ProviderResult<Status> {
        info!(%pod, container = %inputs.container, "executing command");
        let status = client.exec(pod, &inputs.container, &inputs.cmd).await?;

        match status {
            Some(status) if status.status.as_deref() == Some("Success") => Ok(status),
            Some(status) => {
                let raw = to_record(&status)?.to_string();
                bail!(ErrorKind::ExecFailed, "Command exited unsuccessfully", raw);
            }
            None => bail!(
                ErrorKind::ExecFailed,
                "Exec session ended without a status",
                format!("{pod}")
            ),
        }
    }
}

#[async_trait]
impl ResourceProvider for PodExecutor {
    type Inputs = ExecInputs;

    fn kind(&self) -> &'static str {
        "exec"
    }

    fn check(&self, _olds: Option<&ExecInputs>, news: ExecInputs) -> CheckResult<ExecInputs> {
        let mut failures = vec![];

        if news.cmd.is_empty() {
            failures.push(CheckFailure::new(
                ErrorKind::MissingCommand,
                "cmd",
                "a command is required",
            ));
        }

        CheckResult {
            inputs: news,
            failures,
        }
    }

    fn diff(&self, _id: &str, olds: &ExecInputs, news: &ExecInputs) -> DiffResult {
        let mut diff = DiffResult::default();

        diff.replace_if(olds.namespace != news.namespace, "namespace");
        diff.replace_if(olds.pod_selector != news.pod_selector, "podSelector");
        diff.replace_if(concatenated(&olds.cmd) != concatenated(&news.cmd), "cmd");

        diff
    }

    fn recorded_inputs(&self, inputs: &ExecInputs) -> ExecInputs {
        ExecInputs {
            kube_config: String::new(),
            ..inputs.clone()
        }
    }

    #[instrument(
        name = "exec_create",
        skip_all,
        fields(namespace = %inputs.namespace, selector = %inputs.pod_selector)
    )]
    async fn create(&self, inputs: &ExecInputs) -> ProviderResult<CreateResult> {
        let client = self.factory.connect(&inputs.kube_config).await?;
        let pod = PodResolver::new(client.clone(), self.config.pod_resolution_retry.clone())
            .resolve(&inputs.namespace, &inputs.pod_selector)
            .await?;

        let status = tokio::time::timeout(
            self.config.operation_timeout(),
            self.run(client.as_ref(), &pod, inputs),
        )
        .await??;

        let id = exec_identity(&inputs.cmd);
        info!(%pod, %id, "command succeeded");

        Ok(CreateResult {
            id,
            results: vec![to_record(&status)?],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::k8s::{MockPodClient, MockPodClientFactory};

    fn inputs(cmd: &[&str]) -> ExecInputs {
        ExecInputs {
            namespace: "timescale".to_owned(),
            pod_selector: "role=master".to_owned(),
            kube_config: "apiVersion: v1".to_owned(),
            container: "timescaledb".to_owned(),
            cmd: cmd.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn executor() -> PodExecutor {
        PodExecutor::new(
            Arc::new(MockPodClientFactory::new(MockPodClient::new())),
            ProviderConfig::default(),
        )
    }

    #[test]
    fn check_requires_a_command() {
        let result = executor().check(None, inputs(&[]));
        assert!(!result.is_ok());
        assert_eq!(result.failures[0].property, "cmd");
        assert_eq!(result.failures[0].kind, ErrorKind::MissingCommand);

        assert!(executor().check(None, inputs(&["ls"])).is_ok());
    }

    #[test]
    fn diff_ignores_kube_config_and_token_split() {
        let olds = inputs(&["psql", "-c", "SELECT 1"]);
        let mut news = inputs(&["psql-c", "SELECT 1"]);
        news.kube_config = "apiVersion: v2".to_owned();

        assert!(!executor().diff("id", &olds, &news).requires_replacement());
    }

    #[test]
    fn diff_replaces_on_target_changes() {
        let olds = inputs(&["ls"]);
        let mut news = inputs(&["ls"]);
        news.namespace = "monitoring".to_owned();
        news.pod_selector = "app=grafana".to_owned();

        let diff = executor().diff("id", &olds, &news);
        assert_eq!(diff.replaces, vec!["namespace", "podSelector"]);
    }

    #[test]
    fn recorded_inputs_drop_the_kube_config() {
        let news = inputs(&["ls"]);
        let recorded = executor().recorded_inputs(&news);

        assert!(recorded.kube_config.is_empty());
        assert!(!executor().diff("id", &recorded, &news).requires_replacement());
    }

    #[test]
    fn inputs_use_camel_case_and_default_cmd() {
        let parsed: ExecInputs = serde_json::from_value(serde_json::json!({
            "namespace": "timescale",
            "podSelector": "role=master",
            "kubeConfig": "apiVersion: v1",
            "container": "timescaledb",
        }))
        .unwrap();

        assert!(parsed.cmd.is_empty());
        assert!(!format!("{parsed:?}").contains("apiVersion"));
    }
}
