//! Subcommand implementations

pub mod check;
pub mod replay;
pub mod session;
