// src/commands/mod.rs
//! Command handlers for the anchore worker CLI

mod config;
mod scan;

pub use config::{cmd_show_config, load_config};
pub use scan::{ScanArgs, cmd_scan};
