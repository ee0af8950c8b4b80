//! Tooling & Integration Layer
//!
//! Operator CLI over the cache and the text formatting it prints with.

pub mod cli;
pub mod format;

pub use cli::{Cli, CliContext, Commands};
