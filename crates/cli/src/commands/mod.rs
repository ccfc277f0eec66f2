//! Subcommand implementations

pub mod anomalies;
pub mod history;
pub mod status;
