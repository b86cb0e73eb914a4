//! Bearer credential from `secret.json` or the environment.

use std::path::Path;

use recs_core::error::Result;
use recs_core::principal::CredentialProvider;
use serde::Deserialize;

use crate::paths::RecsPaths;

pub const ENV_API_TOKEN: &str = "RECS_API_TOKEN";

#[derive(Debug, Default, Deserialize)]
struct SecretFile {
    #[serde(default)]
    api_token: Option<String>,
}

/// Resolves the token once at construction. `RECS_API_TOKEN` wins over the
/// file; neither present means an anonymous principal.
pub struct SecretCredentialProvider {
    token: Option<String>,
}

impl SecretCredentialProvider {
    pub fn load() -> Result<Self> {
        Self::load_with(&RecsPaths::secret_file()?, |key| std::env::var(key).ok())
    }

    pub fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = match env(ENV_API_TOKEN).filter(|t| !t.trim().is_empty()) {
            Some(token) => Some(token),
            None => read_secret(path)?.api_token,
        };
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

        tracing::debug!(authenticated = token.is_some(), "credential: resolved");
        Ok(Self { token })
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

fn read_secret(path: &Path) -> Result<SecretFile> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(SecretFile::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SecretFile::default()),
        Err(e) => Err(e.into()),
    }
}

impl CredentialProvider for SecretCredentialProvider {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

impl std::fmt::Debug for SecretCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCredentialProvider")
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}
