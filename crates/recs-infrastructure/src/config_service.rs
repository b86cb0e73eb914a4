//! Loads `ClientConfig` from `config.toml` and the environment.
//!
//! Precedence: environment over file over defaults. A missing file is not an
//! error; a malformed one is.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use recs_core::config::ClientConfig;
use recs_core::error::Result;
use recs_core::RecsError;

use crate::paths::RecsPaths;
use crate::storage::AtomicTomlFile;

pub const ENV_API_BASE_URL: &str = "RECS_API_BASE_URL";
pub const ENV_STREAMING: &str = "RECS_STREAMING";

/// Loads and caches the effective configuration.
#[derive(Clone)]
pub struct ConfigService {
    file: Arc<AtomicTomlFile<ClientConfig>>,
    cached: Arc<RwLock<Option<ClientConfig>>>,
}

impl ConfigService {
    /// Service over the default `~/.config/recs/config.toml`.
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(RecsPaths::config_file()?))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(AtomicTomlFile::new(path)),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }

    /// The effective configuration, read from disk on first use.
    pub fn get_config(&self) -> Result<ClientConfig> {
        if let Some(cached) = self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let config = self.load_with(|key| std::env::var(key).ok())?;
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(config)
    }

    /// Reads the file and applies overrides from `env`.
    pub fn load_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<ClientConfig> {
        let mut config = self.file.load()?.unwrap_or_default();
        apply_env_overrides(&mut config, env)?;
        tracing::debug!(
            path = %self.file.path().display(),
            base_url = %config.api_base_url,
            streaming = config.streaming,
            "config: loaded"
        );
        Ok(config)
    }

    /// Edits the file in place (environment overrides are not persisted).
    pub fn update(&self, f: impl FnOnce(&mut ClientConfig) -> Result<()>) -> Result<ClientConfig> {
        let saved = self.file.update(ClientConfig::default, |config| {
            f(config)?;
            Ok::<_, RecsError>(config.clone())
        })?;
        self.invalidate_cache();
        Ok(saved)
    }

    pub fn invalidate_cache(&self) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn apply_env_overrides(
    config: &mut ClientConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(url) = env(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
        config.api_base_url = url.trim().to_string();
    }
    if let Some(raw) = env(ENV_STREAMING) {
        config.streaming = parse_bool(&raw)
            .ok_or_else(|| RecsError::config(format!("{ENV_STREAMING} must be a boolean, got '{raw}'")))?;
    }
    Ok(())
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let service = ConfigService::with_path(dir.path().join("config.toml"));
        assert_eq!(service.load_with(env(&[])).unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_base_url = \"https://file.example.com\"\nstreaming = true\n",
        )
        .unwrap();

        let service = ConfigService::with_path(&path);
        let config = service
            .load_with(env(&[
                (ENV_API_BASE_URL, "https://env.example.com"),
                (ENV_STREAMING, "off"),
            ]))
            .unwrap();

        assert_eq!(config.api_base_url, "https://env.example.com");
        assert!(!config.streaming);
    }

    #[test]
    fn test_bad_streaming_flag_is_config_error() {
        let dir = TempDir::new().unwrap();
        let service = ConfigService::with_path(dir.path().join("config.toml"));
        let err = service
            .load_with(env(&[(ENV_STREAMING, "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, RecsError::Config(_)));
    }

    #[test]
    fn test_update_persists_and_invalidates() {
        let dir = TempDir::new().unwrap();
        let service = ConfigService::with_path(dir.path().join("config.toml"));

        let saved = service
            .update(|config| {
                config.prefetch_after_generate = true;
                Ok(())
            })
            .unwrap();
        assert!(saved.prefetch_after_generate);
        assert!(service.load_with(env(&[])).unwrap().prefetch_after_generate);
    }
}
