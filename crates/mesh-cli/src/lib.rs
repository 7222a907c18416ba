//! Multi-AP controller daemon
//!
//! Wires the controller engine to a UDP broker link and drives its timers from tokio.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod link;

pub use cli::Cli;
pub use daemon::Daemon;
pub use error::{CliError, Result};
