//! TOML-backed quota record.

use std::path::PathBuf;

use recs_core::error::Result;
use recs_core::quota::{QuotaCounter, QuotaStore};

use crate::paths::RecsPaths;
use crate::storage::AtomicTomlFile;

/// Persists the quota record as `{count, reset_boundary = "YYYY-MM-DD"}`.
pub struct FileQuotaStore {
    file: AtomicTomlFile<QuotaCounter>,
}

impl FileQuotaStore {
    /// Store at the default location (`~/.local/share/recs/quota.toml`).
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(RecsPaths::quota_file()?))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file: AtomicTomlFile::new(path),
        }
    }
}

impl QuotaStore for FileQuotaStore {
    fn load(&self) -> Result<Option<QuotaCounter>> {
        match self.file.load() {
            Ok(counter) => Ok(counter),
            Err(err) => {
                // A corrupt record is replaced on the next save
                tracing::warn!(path = %self.file.path().display(), error = %err, "quota: unreadable record ignored");
                Ok(None)
            }
        }
    }

    fn save(&self, counter: &QuotaCounter) -> Result<()> {
        self.file.save(counter)?;
        tracing::debug!(count = counter.count, boundary = %counter.reset_boundary, "quota: record saved");
        Ok(())
    }
}
