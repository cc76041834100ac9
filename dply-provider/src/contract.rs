//! The contract a declarative engine drives an imperative action through.
//!
//! Every action type implements [`ResourceProvider`]. The engine validates new
//! inputs with [`ResourceProvider::check`], compares them with the last
//! applied inputs with [`ResourceProvider::diff`], and runs the action with
//! [`ResourceProvider::create`] when nothing was applied yet or a replacement
//! is required. Actions are never updated in place.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::provider_error;

/// A single reason why inputs were rejected by `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Name of the offending input property, as serialized.
    pub property: String,
    /// Human readable reason.
    pub reason: String,
    /// Classification of the failure.
    #[serde(skip, default = "unknown_kind")]
    pub kind: ErrorKind,
}

fn unknown_kind() -> ErrorKind {
    ErrorKind::Unknown
}

impl CheckFailure {
    pub fn new(kind: ErrorKind, property: &str, reason: impl Into<String>) -> Self {
        Self {
            property: property.to_owned(),
            reason: reason.into(),
            kind,
        }
    }
}

/// Outcome of [`ResourceProvider::check`].
#[derive(Debug, Clone)]
pub struct CheckResult<I> {
    /// The inputs, handed back unchanged.
    pub inputs: I,
    /// Every validation failure found. Empty means the inputs are accepted.
    pub failures: Vec<CheckFailure>,
}

impl<I> CheckResult<I> {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the accepted inputs, or one validation error per failure.
    pub fn into_inputs(self) -> ProviderResult<I> {
        if self.failures.is_empty() {
            return Ok(self.inputs);
        }

        let errors = self
            .failures
            .into_iter()
            .map(|failure| {
                ProviderError::from((
                    failure.kind,
                    "Invalid resource inputs",
                    format!("{}: {}", failure.property, failure.reason),
                ))
            })
            .collect::<Vec<_>>();

        Err(ProviderError::many(errors))
    }
}

/// Outcome of [`ResourceProvider::diff`].
///
/// A non-empty [`DiffResult::replaces`] is the replacement trigger: the
/// engine forgets the materialized action and creates it again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Serialized names of the properties whose change forces a replacement.
    pub replaces: Vec<String>,
}

impl DiffResult {
    /// Records that `property` changed when `changed` is true.
    pub fn replace_if(&mut self, changed: bool, property: &str) {
        if changed {
            self.replaces.push(property.to_owned());
        }
    }

    pub fn requires_replacement(&self) -> bool {
        !self.replaces.is_empty()
    }

    pub fn replaces(&self, property: &str) -> bool {
        self.replaces.iter().any(|p| p == property)
    }
}

/// Outcome of [`ResourceProvider::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    /// Content-derived identity, see [`crate::identity`].
    pub id: String,
    /// One JSON record per command or statement run, in order.
    pub results: Vec<serde_json::Value>,
}

/// Serializes `value` into a JSON result record.
pub fn to_record<T: Serialize>(value: &T) -> ProviderResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|err| {
        provider_error!(
            ErrorKind::SerializationError,
            "Result record could not be serialized",
            err
        )
    })
}

/// An imperative action exposed as a declarative resource.
///
/// Two instances targeting the same pod are not serialized against each
/// other. Callers that need ordering must express it themselves.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Desired state of the resource.
    type Inputs: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Short name of the resource kind, used in logs.
    fn kind(&self) -> &'static str;

    /// Validates `news`. `olds` are the last applied inputs, if any.
    fn check(&self, olds: Option<&Self::Inputs>, news: Self::Inputs) -> CheckResult<Self::Inputs>;

    /// Decides whether moving from `olds` to `news` requires re-running the action.
    fn diff(&self, id: &str, olds: &Self::Inputs, news: &Self::Inputs) -> DiffResult;

    /// Returns `inputs` in the form a caller may persist them.
    ///
    /// Secrets are dropped or replaced by digests that `diff` still accepts
    /// as previous inputs. The default persists the inputs unchanged.
    fn recorded_inputs(&self, inputs: &Self::Inputs) -> Self::Inputs {
        inputs.clone()
    }

    /// Runs the action and returns its identity and results.
    async fn create(&self, inputs: &Self::Inputs) -> ProviderResult<CreateResult>;

    /// Forgets a materialized action.
    ///
    /// Side effects of a command or statement cannot be reverted generically,
    /// so the default only logs.
    async fn delete(&self, id: &str, _inputs: &Self::Inputs) -> ProviderResult<()> {
        info!(kind = self.kind(), id, "dropping action state, remote side effects are kept");
        Ok(())
    }
}
