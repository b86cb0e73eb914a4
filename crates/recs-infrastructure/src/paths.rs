//! Where recs keeps its files.
//!
//! ```text
//! ~/.config/recs/
//! ├── config.toml      # ClientConfig
//! └── secret.json      # {"api_token": "..."}
//!
//! ~/.local/share/recs/
//! └── quota.toml       # anonymous daily quota record
//! ```

use std::path::PathBuf;

use recs_core::RecsError;
use thiserror::Error;

const APP_DIR: &str = "recs";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("cannot determine the {0} directory for this platform")]
    DirNotFound(&'static str),
}

impl From<PathError> for RecsError {
    fn from(err: PathError) -> Self {
        RecsError::config(err.to_string())
    }
}

pub struct RecsPaths;

impl RecsPaths {
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::DirNotFound("config"))
    }

    /// Directory for state the user does not edit.
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_local_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::DirNotFound("data"))
    }

    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Plaintext credentials. Keep it at mode 600.
    pub fn secret_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("secret.json"))
    }

    pub fn quota_file() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("quota.toml"))
    }
}
