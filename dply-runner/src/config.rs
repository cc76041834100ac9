use std::collections::HashSet;
use std::path::PathBuf;

use dply_config::load_config;
use dply_config::shared::{PgCredentials, ProviderConfig, TlsConfig, ValidationError};
use dply_provider::exec::ExecInputs;
use dply_provider::sql::SqlInputs;
use serde::Deserialize;
use thiserror::Error;

/// Errors found while validating a [`RunnerConfig`].
#[derive(Debug, Error)]
pub enum RunnerConfigError {
    #[error("Invalid provider settings: {0}")]
    Provider(#[from] ValidationError),
    #[error("Action name `{0}` is declared more than once")]
    DuplicateAction(String),
    #[error("An action has an empty name")]
    UnnamedAction,
}

/// Configuration of an apply run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    /// File holding the kubeconfig of the target cluster.
    pub kube_config_path: PathBuf,
    /// JSON file the applied actions are recorded in.
    pub state_path: PathBuf,
    /// Actions, applied in declaration order.
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

impl RunnerConfig {
    /// Validates the [`RunnerConfig`].
    pub fn validate(&self) -> Result<(), RunnerConfigError> {
        self.provider.validate()?;

        let mut names = HashSet::new();
        for action in &self.actions {
            let name = action.name();
            if name.trim().is_empty() {
                return Err(RunnerConfigError::UnnamedAction);
            }
            if !names.insert(name) {
                return Err(RunnerConfigError::DuplicateAction(name.to_owned()));
            }
        }

        Ok(())
    }
}

/// A declared action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    Exec(ExecActionConfig),
    Sql(SqlActionConfig),
}

impl ActionConfig {
    /// Name the action is recorded under in the state file.
    pub fn name(&self) -> &str {
        match self {
            ActionConfig::Exec(action) => &action.name,
            ActionConfig::Sql(action) => &action.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecActionConfig {
    pub name: String,
    pub namespace: String,
    pub pod_selector: String,
    pub container: String,
    #[serde(default)]
    pub cmd: Vec<String>,
}

impl ExecActionConfig {
    pub fn to_inputs(&self, kube_config: &str) -> ExecInputs {
        ExecInputs {
            namespace: self.namespace.clone(),
            pod_selector: self.pod_selector.clone(),
            kube_config: kube_config.to_owned(),
            container: self.container.clone(),
            cmd: self.cmd.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlActionConfig {
    pub name: String,
    pub namespace: String,
    pub pod_selector: String,
    #[serde(default)]
    pub pod_port: u16,
    pub postgres_cred: PgCredentials,
    #[serde(default)]
    pub sql_commands: Vec<String>,
    #[serde(default)]
    pub transactional: bool,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl SqlActionConfig {
    pub fn to_inputs(&self, kube_config: &str) -> SqlInputs {
        SqlInputs {
            namespace: self.namespace.clone(),
            pod_selector: self.pod_selector.clone(),
            kube_config: kube_config.to_owned(),
            pod_port: self.pod_port,
            postgres_cred: self.postgres_cred.clone(),
            sql_commands: self.sql_commands.clone(),
            transactional: self.transactional,
            tls: self.tls.clone(),
        }
    }
}

/// Loads the [`RunnerConfig`] and validates it.
pub fn load_runner_config() -> anyhow::Result<RunnerConfig> {
    let config = load_config::<RunnerConfig>()?;
    config.validate()?;

    Ok(config)
}
