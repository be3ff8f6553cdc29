//! Command-line inspection and maintenance of Crashlog stores
//!
//! The `crashlog` binary is a thin wrapper over [`commands::run`].

pub mod cli;
pub mod commands;
pub mod sink;

pub use cli::{Cli, Command};
pub use sink::DirectorySink;
