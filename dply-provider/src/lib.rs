//! Imperative pod actions exposed as declarative resources.
//!
//! Two providers implement the [`contract::ResourceProvider`] contract:
//! [`exec::PodExecutor`] runs a command inside a pod and
//! [`sql::PodSqlRunner`] runs SQL against a database pod through a
//! port-forward tunnel. Both find their pod with [`resolver::PodResolver`]
//! and derive their identity from the action text with [`identity`].

pub mod contract;
pub mod encryption;
pub mod error;
pub mod exec;
pub mod identity;
pub mod k8s;
mod macros;
pub mod resolver;
pub mod sql;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
