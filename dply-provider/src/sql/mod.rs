//! Running SQL against a database pod as a declarative resource.
//!
//! A create resolves the pod, opens a [`PortForwardTunnel`] to the database
//! port, connects a [`SqlSession`] to the local end of the tunnel and runs the
//! statements. The session and the tunnel are closed on every exit path.

mod runner;
pub mod session;
pub mod tls;
pub mod tunnel;

pub use runner::{PodSqlRunner, SqlInputs};
pub use session::SqlSession;
pub use tunnel::PortForwardTunnel;
