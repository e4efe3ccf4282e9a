//! Data models module
//!
//! - `config` - Configuration management
//! - `constants` - Configuration keys and defaults

pub mod config;
pub mod constants;

pub use config::Configuration;
pub use constants::*;
