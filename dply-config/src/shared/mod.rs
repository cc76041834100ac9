mod base;
mod postgres;
mod provider;
mod retry;

pub use base::*;
pub use postgres::*;
pub use provider::*;
pub use retry::*;
