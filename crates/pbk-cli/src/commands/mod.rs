//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod deps;
pub mod export;
pub mod import;
pub mod inspect;
pub mod list;
pub mod schedule;
pub mod schemas;
pub mod watch;
