//! Configuration management for dply components.
//!
//! Provides environment detection, configuration loading from YAML files and
//! environment variables, secret handling, and the shared configuration types
//! used by the pod action providers and the apply runner.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
