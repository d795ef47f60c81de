//! Platform paths for client configuration.
//!
//! ```text
//! ~/.config/vip-client/        # Config directory (XDG on Linux)
//! └── config.toml              # Client configuration
//! ```

use std::path::PathBuf;
use vip_core::error::{Result, VipError};

const APP_DIR: &str = "vip-client";

pub struct VipPaths;

impl VipPaths {
    /// Returns the client configuration directory.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| VipError::config("cannot determine the configuration directory"))
    }

    /// Returns the path to the main configuration file.
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}
