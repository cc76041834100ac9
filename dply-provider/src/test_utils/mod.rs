//! Helpers shared by the unit and integration tests of the providers.
//!
//! [`k8s::MockPodClient`] stands in for a cluster: it serves scripted pod
//! listings, answers exec calls with a canned status and forwards
//! port-forward streams to a local TCP address. [`net`] has the small TCP
//! servers the tunnel tests forward to.
pub mod k8s;
pub mod net;
