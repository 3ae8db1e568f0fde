//! Configuration for Deskline clients.
//!
//! Provides TOML-based configuration with:
//! - Backend API and realtime endpoints
//! - Token file location
//! - HTTP timeout and realtime backoff settings
//! - XDG discovery with `DESKLINE_CONFIG_DIR` / `DESKLINE_SERVER_URL` overrides

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    load_config, load_config_file, save_config, xdg_config_dir, xdg_config_path, LoadedConfig,
    SERVER_URL_ENV,
};
pub use error::{ConfigError, Result};
pub use types::*;
