//! Kubernetes integration for the pod action providers.
//!
//! Providers depend on the [`PodClient`] trait only. The default
//! implementation, [`client::KubePodClient`], talks to the cluster described by
//! the credential blob handed in with each request and runs exec and
//! port-forward sessions over websockets. Keeping the abstraction in [`base`]
//! lets tests swap in an in-memory client.

mod base;
pub mod client;

pub use base::*;
