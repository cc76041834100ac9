use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dply_config::shared::{PgCredentials, ProviderConfig, RetryConfig, TlsConfig};
use dply_provider::contract::ResourceProvider;
use dply_provider::exec::PodExecutor;
use dply_provider::k8s::PodClientFactory;
use dply_provider::k8s::client::KubePodClientFactory;
use dply_provider::sql::PodSqlRunner;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ActionConfig, RunnerConfig};
use crate::state::StateFile;

/// What happened to a single action during an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Created,
    Replaced,
    Unchanged,
}

/// Counts of action outcomes of an apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
    /// Whether the apply stopped early because of a shutdown signal.
    pub interrupted: bool,
}

impl ApplySummary {
    fn count(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Created => self.created += 1,
            ActionOutcome::Replaced => self.replaced += 1,
            ActionOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Applies the actions of `runner_config` against the configured cluster.
pub async fn start_runner_with_config(runner_config: RunnerConfig) -> anyhow::Result<()> {
    info!("starting apply");

    log_config(&runner_config);

    let kube_config = std::fs::read_to_string(&runner_config.kube_config_path).with_context(|| {
        format!(
            "failed to read kubeconfig {}",
            runner_config.kube_config_path.display()
        )
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let shutdown_handle = tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, stopping after the current action");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, stopping after the current action");
            }
        }

        if let Err(e) = shutdown_tx.send(()) {
            warn!("failed to send shutdown signal: {:?}", e);
        }
    });

    let result = apply_actions(
        &runner_config.actions,
        &kube_config,
        Arc::new(KubePodClientFactory),
        &runner_config.provider,
        &runner_config.state_path,
        shutdown_rx,
    )
    .await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    let summary = result?;
    info!(
        created = summary.created,
        replaced = summary.replaced,
        unchanged = summary.unchanged,
        interrupted = summary.interrupted,
        "apply completed"
    );

    Ok(())
}

/// Applies `actions` in order, recording each created action in the state at
/// `state_path` right away.
///
/// The first failing action stops the apply. Actions already applied stay
/// recorded. A shutdown signal stops the apply before the next action.
pub async fn apply_actions(
    actions: &[ActionConfig],
    kube_config: &str,
    factory: Arc<dyn PodClientFactory>,
    provider_config: &ProviderConfig,
    state_path: &Path,
    shutdown_rx: watch::Receiver<()>,
) -> anyhow::Result<ApplySummary> {
    let executor = PodExecutor::new(factory.clone(), provider_config.clone());
    let sql_runner = PodSqlRunner::new(factory, provider_config.clone());

    let mut state = StateFile::load(state_path)?;
    let mut summary = ApplySummary::default();

    for action in actions {
        if shutdown_rx.has_changed().unwrap_or(false) {
            warn!(action = action.name(), "shutdown requested, skipping remaining actions");
            summary.interrupted = true;
            break;
        }

        let outcome = match action {
            ActionConfig::Exec(exec) => {
                apply_action(
                    &executor,
                    &exec.name,
                    exec.to_inputs(kube_config),
                    &mut state,
                    state_path,
                )
                .await
            }
            ActionConfig::Sql(sql) => {
                apply_action(
                    &sql_runner,
                    &sql.name,
                    sql.to_inputs(kube_config),
                    &mut state,
                    state_path,
                )
                .await
            }
        }
        .with_context(|| format!("action `{}` failed", action.name()))?;

        summary.count(outcome);
    }

    Ok(summary)
}

/// Drives one action through check, diff and create.
async fn apply_action<P>(
    provider: &P,
    name: &str,
    news: P::Inputs,
    state: &mut StateFile,
    state_path: &Path,
) -> anyhow::Result<ActionOutcome>
where
    P: ResourceProvider,
{
    let previous = state
        .get(name)
        .filter(|entry| entry.kind == provider.kind())
        .cloned();
    let olds = previous
        .as_ref()
        .map(|entry| serde_json::from_value::<P::Inputs>(entry.inputs.clone()))
        .transpose()
        .with_context(|| format!("recorded inputs of `{name}` are unreadable"))?;

    let news = provider.check(olds.as_ref(), news).into_inputs()?;

    let outcome = match (&previous, &olds) {
        (Some(entry), Some(olds)) => {
            let diff = provider.diff(&entry.id, olds, &news);
            if !diff.requires_replacement() {
                info!(action = name, id = %entry.id, "action is up to date");
                return Ok(ActionOutcome::Unchanged);
            }

            info!(action = name, replaces = ?diff.replaces, "action changed, replacing");
            provider.delete(&entry.id, olds).await?;

            ActionOutcome::Replaced
        }
        _ => ActionOutcome::Created,
    };

    let result = provider.create(&news).await?;
    info!(action = name, id = %result.id, "action applied");

    state.record(name, provider.kind(), &provider.recorded_inputs(&news), &result)?;
    state.save(state_path)?;

    Ok(outcome)
}

fn log_config(config: &RunnerConfig) {
    debug!(
        kube_config_path = %config.kube_config_path.display(),
        state_path = %config.state_path.display(),
        actions = config.actions.len(),
        "runner config"
    );
    debug!(
        operation_timeout_secs = config.provider.operation_timeout_secs,
        "provider config"
    );
    log_retry_config(&config.provider.pod_resolution_retry);

    for action in &config.actions {
        match action {
            ActionConfig::Exec(exec) => debug!(
                name = exec.name,
                namespace = exec.namespace,
                pod_selector = exec.pod_selector,
                container = exec.container,
                "exec action"
            ),
            ActionConfig::Sql(sql) => {
                debug!(
                    name = sql.name,
                    namespace = sql.namespace,
                    pod_selector = sql.pod_selector,
                    pod_port = sql.pod_port,
                    statements = sql.sql_commands.len(),
                    transactional = sql.transactional,
                    "sql action"
                );
                log_pg_credentials(&sql.postgres_cred);
                log_tls_config(&sql.tls);
            }
        }
    }
}

fn log_retry_config(config: &RetryConfig) {
    debug!(
        max_attempts = config.max_attempts,
        initial_delay_ms = config.initial_delay_ms,
        max_delay_ms = config.max_delay_ms,
        backoff_factor = config.backoff_factor,
        "pod resolution retry config"
    );
}

fn log_pg_credentials(config: &PgCredentials) {
    debug!(
        user = config.user,
        database = config.database,
        "postgres credentials"
    );
}

fn log_tls_config(config: &TlsConfig) {
    debug!(
        enabled = config.enabled,
        verifies_server = config.verifies_server(),
        server_name = config.server_name(),
        "postgres tls config"
    );
}
