//! Crash-safe TOML files.
//!
//! Writes go to a sibling temp file that is fsynced and renamed over the
//! target. Read-modify-write cycles hold an exclusive lock on a `.lock`
//! sibling so two processes cannot interleave.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use recs_core::RecsError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicTomlError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot lock {}: {message}", path.display())]
    Lock { path: PathBuf, message: String },
}

impl From<AtomicTomlError> for RecsError {
    fn from(err: AtomicTomlError) -> Self {
        match err {
            AtomicTomlError::Parse { .. } | AtomicTomlError::Serialize(_) => {
                RecsError::Serialization {
                    format: "TOML".into(),
                    message: err.to_string(),
                }
            }
            AtomicTomlError::Io { .. } | AtomicTomlError::Lock { .. } => {
                RecsError::io(err.to_string())
            }
        }
    }
}

pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> AtomicTomlError {
        AtomicTomlError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads the file. A missing or blank file is `None`.
    pub fn load(&self) -> Result<Option<T>, AtomicTomlError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        toml::from_str(&content)
            .map(Some)
            .map_err(|source| AtomicTomlError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Replaces the file contents with `data`.
    pub fn save(&self, data: &T) -> Result<(), AtomicTomlError> {
        let _lock = FileLock::acquire(&self.path)?;
        self.write(data)
    }

    fn write(&self, data: &T) -> Result<(), AtomicTomlError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let body = toml::to_string_pretty(data)?;
        let tmp_path = self.temp_path();

        let mut tmp = File::create(&tmp_path).map_err(|e| self.io_err(e))?;
        tmp.write_all(body.as_bytes()).map_err(|e| self.io_err(e))?;
        tmp.sync_all().map_err(|e| self.io_err(e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_err(e))
    }

    /// Loads (or starts from `default`), applies `f` and saves, under the lock.
    ///
    /// Returns what `f` returns. Nothing is written if `f` fails.
    pub fn update<R, E, F>(&self, default: impl FnOnce() -> T, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<AtomicTomlError>,
    {
        let _lock = FileLock::acquire(&self.path)?;

        let mut data = match self.load()? {
            Some(data) => data,
            None => default(),
        };
        let out = f(&mut data)?;
        self.write(&data)?;
        Ok(out)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

/// Exclusive lock on `<file>.lock`, released on drop.
struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, AtomicTomlError> {
        let lock_path = path.with_extension("lock");
        let io_err = |source: std::io::Error| AtomicTomlError::Io {
            path: lock_path.clone(),
            source,
        };

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(io_err)?;

        fs2::FileExt::lock_exclusive(&file).map_err(|e| AtomicTomlError::Lock {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;

        Ok(Self { file, lock_path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
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
        owner: String,
        count: u32,
    }

    fn counter(count: u32) -> Counter {
        Counter {
            owner: "anonymous".into(),
            count,
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Counter>::new(dir.path().join("nested/state.toml"));

        file.save(&counter(2)).unwrap();
        assert_eq!(file.load().unwrap(), Some(counter(2)));
        assert!(!dir.path().join("nested/.state.toml.tmp").exists());
    }

    #[test]
    fn test_missing_and_blank_files_load_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        let file = AtomicTomlFile::<Counter>::new(path.clone());
        assert_eq!(file.load().unwrap(), None);

        fs::write(&path, "  \n").unwrap();
        assert_eq!(file.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "count = \"three\"").unwrap();

        let err = AtomicTomlFile::<Counter>::new(path).load().unwrap_err();
        assert!(matches!(err, AtomicTomlError::Parse { .. }));
        assert!(matches!(
            RecsError::from(err),
            RecsError::Serialization { .. }
        ));
    }

    #[test]
    fn test_update_returns_closure_value() {
        let dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Counter>::new(dir.path().join("state.toml"));

        for expected in 1..=3 {
            let seen: u32 = file
                .update(
                    || counter(0),
                    |c| {
                        c.count += 1;
                        Ok::<_, AtomicTomlError>(c.count)
                    },
                )
                .unwrap();
            assert_eq!(seen, expected);
        }
        assert_eq!(file.load().unwrap(), Some(counter(3)));
        assert!(!dir.path().join("state.lock").exists());
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Counter>::new(dir.path().join("state.toml"));
        file.save(&counter(1)).unwrap();

        let result: Result<(), RecsError> = file.update(
            || counter(0),
            |c| {
                c.count = 99;
                Err(RecsError::internal("rejected"))
            },
        );
        assert!(result.is_err());
        assert_eq!(file.load().unwrap(), Some(counter(1)));
    }
}
