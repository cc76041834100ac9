use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use dply_provider::contract::CreateResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input property never written to the state file.
///
/// Providers blank it in their recorded inputs, the key is dropped as well.
const KUBE_CONFIG_PROPERTY: &str = "kubeConfig";

/// What the runner remembers about an applied action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: String,
    pub id: String,
    /// Inputs the action was created with, minus the cluster credentials.
    pub inputs: Value,
    pub outputs: Vec<Value>,
}

/// Applied actions keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
}

impl StateFile {
    /// Reads the state at `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse state file {}", path.display()))?;

        Ok(state)
    }

    /// Writes the state to `path`, replacing the previous file atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, raw)
            .with_context(|| format!("failed to write state file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace state file {}", path.display()))?;

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    /// Records the outcome of a create under `name`.
    pub fn record<I: Serialize>(
        &mut self,
        name: &str,
        kind: &str,
        inputs: &I,
        result: &CreateResult,
    ) -> anyhow::Result<()> {
        let mut inputs = serde_json::to_value(inputs)?;
        if let Value::Object(properties) = &mut inputs {
            properties.remove(KUBE_CONFIG_PROPERTY);
        }

        self.resources.insert(
            name.to_owned(),
            ResourceState {
                kind: kind.to_owned(),
                id: result.id.clone(),
                inputs,
                outputs: result.results.clone(),
            },
        );

        Ok(())
    }
}
