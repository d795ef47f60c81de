//! Atomic file operations.
//!
//! Records are written to a sibling temporary file, flushed to disk, then
//! renamed over the target, so readers observe either the old or the new
//! content.

use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use vip_core::error::{Result, VipError};

/// On-disk encoding of an [`AtomicFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

/// A handle to a serialized record on disk.
///
/// Provides:
/// - **Atomicity**: writes go through a tmp file and an atomic rename
/// - **Isolation**: [`AtomicFile::update`] holds an exclusive lock across
///   read, check and write
/// - **Durability**: explicit fsync before rename
pub struct AtomicFile<T> {
    path: PathBuf,
    format: FileFormat,
    _phantom: PhantomData<T>,
}

impl<T> AtomicFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf, format: FileFormat) -> Self {
        Self {
            path,
            format,
            _phantom: PhantomData,
        }
    }

    pub fn json(path: PathBuf) -> Self {
        Self::new(path, FileFormat::Json)
    }

    pub fn toml(path: PathBuf) -> Self {
        Self::new(path, FileFormat::Toml)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and decodes the file.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(T))`: successfully loaded and decoded
    /// - `Ok(None)`: the file doesn't exist or is empty
    /// - `Err(VipError::Serialization)`: the content could not be decoded
    pub fn load(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        let data = match self.format {
            FileFormat::Json => serde_json::from_str(&content)?,
            FileFormat::Toml => toml::from_str(&content)?,
        };
        Ok(Some(data))
    }

    /// Writes `data` atomically, creating the parent directory if needed.
    pub fn save(&self, data: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = match self.format {
            FileFormat::Json => serde_json::to_string_pretty(data)?,
            FileFormat::Toml => toml::to_string_pretty(data)?,
        };

        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(content.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Read-check-write under an exclusive lock.
    ///
    /// `f` receives the current content (if any) and returns the content to
    /// write. When `f` fails nothing is written.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Option<T>) -> Result<T>,
    {
        let _lock = FileLock::acquire(&self.path)?;
        let current = self.load()?;
        let next = f(current)?;
        self.save(&next)
    }

    /// Deletes the file. Succeeds when it does not exist.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| VipError::io(format!("'{}' has no file name", self.path.display())))?;
        let tmp_name = format!(".{}.tmp", file_name.to_string_lossy());
        Ok(self.path.with_file_name(tmp_name))
    }
}

/// Exclusive lock guard; the lock file is removed on drop.
struct FileLock {
    _file: File,
    lock_path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        let lock_path = path.with_extension("lock");

        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        #[cfg(unix)]
        {
            use fs2::FileExt;
            file.lock_exclusive()
                .map_err(|e| VipError::io(format!("failed to acquire lock: {}", e)))?;
        }

        Ok(FileLock {
            _file: file,
            lock_path,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let temp_dir = TempDir::new().unwrap();
        let value = Counter {
            name: "uploads".to_string(),
            count: 3,
        };

        let json = AtomicFile::<Counter>::json(temp_dir.path().join("c.json"));
        json.save(&value).unwrap();
        assert_eq!(json.load().unwrap(), Some(value.clone()));

        let toml = AtomicFile::<Counter>::toml(temp_dir.path().join("c.toml"));
        toml.save(&value).unwrap();
        assert_eq!(toml.load().unwrap(), Some(value));
    }

    #[test]
    fn test_missing_and_empty_files_load_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.json");
        let file = AtomicFile::<Counter>::json(path.clone());
        assert!(file.load().unwrap().is_none());

        fs::write(&path, "  \n").unwrap();
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_content_is_a_serialization_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let err = AtomicFile::<Counter>::json(path).load().unwrap_err();
        assert!(matches!(err, VipError::Serialization { .. }));
    }

    #[test]
    fn test_update_does_not_write_when_the_check_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("c.json");
        let file = AtomicFile::<Counter>::json(path.clone());

        file.update(|current| {
            assert!(current.is_none());
            Ok(Counter {
                name: "a".to_string(),
                count: 1,
            })
        })
        .unwrap();

        let err = file
            .update(|_| Err(VipError::internal("refused")))
            .unwrap_err();
        assert!(matches!(err, VipError::Internal(_)));
        assert_eq!(file.load().unwrap().unwrap().count, 1);

        assert!(!path.with_extension("lock").exists());
        assert!(!temp_dir.path().join("nested").join(".c.json.tmp").exists());
    }
}
