//! Configuration Module
//!
//! Command-line and environment options, their validation, and the
//! translation into server options.

pub mod cli;
pub mod manager;
pub mod types;

pub use cli::CliArgs;
pub use manager::ConfigManager;
pub use types::*;
