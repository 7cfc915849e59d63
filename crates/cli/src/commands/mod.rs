//! CLI subcommand implementations

pub mod registry;
pub mod serving;
pub mod train;
