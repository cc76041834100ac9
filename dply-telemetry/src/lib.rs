//! Tracing setup shared by dply binaries and tests.

mod tracing;

pub use crate::tracing::*;
