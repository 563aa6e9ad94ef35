//! File-system storage: TOML configuration and JSON layout files.

pub mod config;
pub mod layout_file;
