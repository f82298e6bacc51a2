//! Subcommand implementations

pub mod list;
pub mod serve;
pub mod submit;
