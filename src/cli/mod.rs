//! CLI module for the idphoto backend
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use config::CliConfigBuilder;
pub use main_impl::{main, Cli, CliLogFormat, CliOutputFormat, Command};
