//! Configuration service implementation.
//!
//! Loads the client configuration from `<config dir>/vip-client/config.toml`
//! (or an explicit path) and caches it.

use crate::paths::VipPaths;
use crate::storage::AtomicFile;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use vip_core::config::VipConfig;
use vip_core::error::{Result, VipError};

/// Configuration service that loads and caches the client configuration.
///
/// A missing file is created with the defaults on first access.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: PathBuf,
    /// Cached configuration loaded from file.
    config: Arc<RwLock<Option<VipConfig>>>,
}

impl ConfigService {
    /// Creates a service reading the platform default location.
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(VipPaths::config_file()?))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets the configuration, loading it from file if not cached.
    pub fn get_config(&self) -> Result<VipConfig> {
        {
            let read_lock = self
                .config
                .read()
                .map_err(|_| VipError::internal("configuration cache lock poisoned"))?;
            if let Some(ref cached) = *read_lock {
                return Ok(cached.clone());
            }
        }

        let loaded = self.load_config()?;

        let mut write_lock = self
            .config
            .write()
            .map_err(|_| VipError::internal("configuration cache lock poisoned"))?;
        *write_lock = Some(loaded.clone());
        Ok(loaded)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        if let Ok(mut write_lock) = self.config.write() {
            *write_lock = None;
        }
    }

    fn load_config(&self) -> Result<VipConfig> {
        let file = AtomicFile::<VipConfig>::toml(self.path.clone());
        match file.load() {
            Ok(Some(config)) => {
                tracing::debug!("Configuration loaded from {}", self.path.display());
                Ok(config)
            }
            Ok(None) => {
                let config = VipConfig::default();
                file.save(&config)?;
                tracing::info!("Default configuration written to {}", self.path.display());
                Ok(config)
            }
            Err(VipError::Serialization { message, .. }) => Err(VipError::config(format!(
                "invalid configuration file {}: {}",
                self.path.display(),
                message
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vip-client").join("config.toml");
        let service = ConfigService::with_path(&path);

        let config = service.get_config().unwrap();
        assert_eq!(config, VipConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_cache_until_invalidated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[transfer]\nconcurrency = 2\n").unwrap();
        let service = ConfigService::with_path(&path);
        assert_eq!(service.get_config().unwrap().transfer.concurrency, 2);

        std::fs::write(&path, "[transfer]\nconcurrency = 6\n").unwrap();
        assert_eq!(service.get_config().unwrap().transfer.concurrency, 2);

        service.invalidate_cache();
        assert_eq!(service.get_config().unwrap().transfer.concurrency, 6);
    }

    #[test]
    fn test_invalid_file_is_a_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[transfer\n").unwrap();
        let err = ConfigService::with_path(&path).get_config().unwrap_err();
        assert!(err.is_configuration());
    }
}
