use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dply_config::shared::{PgCredentials, ProviderConfig, TlsConfig};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::contract::{CheckFailure, CheckResult, CreateResult, DiffResult, ResourceProvider};
use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::identity::{concatenated, password_digest, sql_identity};
use crate::k8s::PodClientFactory;
use crate::provider_error;
use crate::resolver::PodResolver;
use crate::sql::session::SqlSession;
use crate::sql::tunnel::PortForwardTunnel;

/// Inputs of a SQL action.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlInputs {
    pub namespace: String,
    /// `key=value` label selector of the database pod.
    pub pod_selector: String,
    /// Kubeconfig YAML of the cluster.
    ///
    /// Callers may leave it out of persisted inputs, it never takes part in a diff.
    #[serde(default)]
    pub kube_config: String,
    /// Port Postgres listens on inside the pod.
    #[serde(default)]
    pub pod_port: u16,
    pub postgres_cred: PgCredentials,
    #[serde(default)]
    pub sql_commands: Vec<String>,
    /// Runs every statement in a single transaction.
    #[serde(default)]
    pub transactional: bool,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl fmt::Debug for SqlInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlInputs")
            .field("namespace", &self.namespace)
            .field("pod_selector", &self.pod_selector)
            .field("kube_config", &"[REDACTED]")
            .field("pod_port", &self.pod_port)
            .field("postgres_cred", &self.postgres_cred)
            .field("sql_commands", &self.sql_commands)
            .field("transactional", &self.transactional)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Runs SQL statements against a database pod through a port-forward tunnel.
pub struct PodSqlRunner {
    factory: Arc<dyn PodClientFactory>,
    config: ProviderConfig,
}

impl PodSqlRunner {
    pub fn new(factory: Arc<dyn PodClientFactory>, config: ProviderConfig) -> Self {
        Self { factory, config }
    }

    async fn run(&self, tunnel: &PortForwardTunnel, inputs: &SqlInputs) -> ProviderResult<Vec<Value>> {
        let session =
            match SqlSession::connect(tunnel.local_addr(), &inputs.postgres_cred, &inputs.tls).await
            {
                Ok(session) => session,
                Err(err) => return Err(blame_tunnel(tunnel, err)),
            };

        let records = session
            .run_statements(&inputs.sql_commands, inputs.transactional)
            .await;
        session.close().await;

        records
    }
}

/// Reports a failed connection as a tunnel failure when the forward broke.
fn blame_tunnel(tunnel: &PortForwardTunnel, err: ProviderError) -> ProviderError {
    if err.kind() != ErrorKind::SqlConnectionFailed {
        return err;
    }

    match tunnel.forward_error() {
        Some(reason) => provider_error!(
            ErrorKind::TunnelSetupFailed,
            "Port-forward to the database pod failed",
            reason
        ),
        None => err,
    }
}

/// Compares credentials by value, accepting recorded password digests.
fn same_credentials(olds: &PgCredentials, news: &PgCredentials) -> bool {
    olds.user == news.user
        && olds.database == news.database
        && password_digest(olds.password.expose_secret())
            == password_digest(news.password.expose_secret())
}

#[async_trait]
impl ResourceProvider for PodSqlRunner {
    type Inputs = SqlInputs;

    fn kind(&self) -> &'static str {
        "sql"
    }

    fn check(&self, _olds: Option<&SqlInputs>, news: SqlInputs) -> CheckResult<SqlInputs> {
        let mut failures = vec![];

        if news.sql_commands.is_empty() {
            failures.push(CheckFailure::new(
                ErrorKind::MissingStatements,
                "sqlCommands",
                "at least one statement is required",
            ));
        }

        if news.pod_port == 0 {
            failures.push(CheckFailure::new(
                ErrorKind::InvalidPort,
                "podPort",
                "must be between 1 and 65535",
            ));
        }

        if let Err(err) = news.tls.validate() {
            failures.push(CheckFailure::new(
                ErrorKind::TlsConfigInvalid,
                "tls",
                err.to_string(),
            ));
        }

        CheckResult {
            inputs: news,
            failures,
        }
    }

    fn diff(&self, _id: &str, olds: &SqlInputs, news: &SqlInputs) -> DiffResult {
        let mut diff = DiffResult::default();

        diff.replace_if(olds.namespace != news.namespace, "namespace");
        diff.replace_if(olds.pod_selector != news.pod_selector, "podSelector");
        diff.replace_if(
            concatenated(&olds.sql_commands) != concatenated(&news.sql_commands),
            "sqlCommands",
        );
        diff.replace_if(
            !same_credentials(&olds.postgres_cred, &news.postgres_cred),
            "postgresCred",
        );

        diff
    }

    fn recorded_inputs(&self, inputs: &SqlInputs) -> SqlInputs {
        let mut recorded = inputs.clone();
        recorded.kube_config.clear();
        recorded.postgres_cred.password =
            password_digest(inputs.postgres_cred.password.expose_secret()).into();

        recorded
    }

    #[instrument(
        name = "sql_create",
        skip_all,
        fields(namespace = %inputs.namespace, selector = %inputs.pod_selector, port = inputs.pod_port)
    )]
    async fn create(&self, inputs: &SqlInputs) -> ProviderResult<CreateResult> {
        let client = self.factory.connect(&inputs.kube_config).await?;
        let pod = PodResolver::new(client.clone(), self.config.pod_resolution_retry.clone())
            .resolve(&inputs.namespace, &inputs.pod_selector)
            .await?;

        let tunnel = PortForwardTunnel::open(client, pod, inputs.pod_port).await?;
        let records =
            tokio::time::timeout(self.config.operation_timeout(), self.run(&tunnel, inputs)).await;
        tunnel.close().await;
        let records = records??;

        let id = sql_identity(&inputs.sql_commands);
        info!(%id, statements = records.len(), "statements succeeded");

        Ok(CreateResult {
            id,
            results: records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::k8s::{MockPodClient, MockPodClientFactory};

    fn inputs(statements: &[&str]) -> SqlInputs {
        SqlInputs {
            namespace: "timescale".to_owned(),
            pod_selector: "role=master".to_owned(),
            kube_config: "apiVersion: v1".to_owned(),
            pod_port: 5432,
            postgres_cred: PgCredentials {
                user: "postgres".to_owned(),
                database: "postgres".to_owned(),
                password: "hunter2".into(),
            },
            sql_commands: statements.iter().map(|s| s.to_string()).collect(),
            transactional: false,
            tls: TlsConfig::require(),
        }
    }

    fn runner() -> PodSqlRunner {
        PodSqlRunner::new(
            Arc::new(MockPodClientFactory::new(MockPodClient::new())),
            ProviderConfig::default(),
        )
    }

    #[test]
    fn check_reports_every_failure() {
        let mut news = inputs(&[]);
        news.pod_port = 0;

        let result = runner().check(None, news);
        let kinds = result
            .failures
            .iter()
            .map(|failure| failure.kind)
            .collect::<Vec<_>>();

        assert_eq!(kinds, vec![ErrorKind::MissingStatements, ErrorKind::InvalidPort]);
    }

    #[test]
    fn check_rejects_roots_without_tls() {
        let mut news = inputs(&["SELECT 1"]);
        news.tls = TlsConfig {
            enabled: false,
            trusted_root_certs: "-----BEGIN CERTIFICATE-----".to_owned(),
            server_name: None,
        };

        let result = runner().check(None, news);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].property, "tls");
    }

    #[test]
    fn diff_compares_credentials_by_value() {
        let olds = inputs(&["SELECT 1"]);
        let news = inputs(&["SELECT 1"]);
        assert!(!runner().diff("id", &olds, &news).requires_replacement());

        let mut rotated = inputs(&["SELECT 1"]);
        rotated.postgres_cred.password = "hunter3".into();
        assert_eq!(runner().diff("id", &olds, &rotated).replaces, vec!["postgresCred"]);
    }

    #[test]
    fn recorded_inputs_keep_only_a_password_digest() {
        let news = inputs(&["SELECT 1"]);
        let recorded = runner().recorded_inputs(&news);

        assert!(recorded.kube_config.is_empty());
        assert_ne!(recorded.postgres_cred.password.expose_secret(), "hunter2");
        assert!(!serde_json::to_string(&recorded).unwrap().contains("hunter2"));

        assert!(!runner().diff("id", &recorded, &news).requires_replacement());

        let mut rotated = inputs(&["SELECT 1"]);
        rotated.postgres_cred.password = "hunter3".into();
        assert_eq!(
            runner().diff("id", &recorded, &rotated).replaces,
            vec!["postgresCred"]
        );
    }

    #[test]
    fn diff_ignores_port_and_kube_config() {
        let olds = inputs(&["SELECT 1;", "SELECT 2;"]);
        let mut news = inputs(&["SELECT 1;SELECT 2;"]);
        news.pod_port = 5433;
        news.kube_config = "apiVersion: v2".to_owned();

        assert!(!runner().diff("id", &olds, &news).requires_replacement());
    }

    #[test]
    fn inputs_deserialize_with_defaults() {
        let parsed: SqlInputs = serde_json::from_value(serde_json::json!({
            "namespace": "timescale",
            "podSelector": "role=master",
            "kubeConfig": "apiVersion: v1",
            "podPort": 5432,
            "postgresCred": {"user": "postgres", "database": "grafana", "password": "hunter2"},
            "sqlCommands": ["SELECT 1"],
        }))
        .unwrap();

        assert!(!parsed.transactional);
        assert!(parsed.tls.enabled);
        assert!(!format!("{parsed:?}").contains("hunter2"));
    }
}
