//! File-backed stores: configuration, credentials and the quota record.

pub mod config_service;
pub mod credential;
pub mod paths;
pub mod quota_store;
pub mod storage;

pub use config_service::ConfigService;
pub use credential::SecretCredentialProvider;
pub use paths::RecsPaths;
pub use quota_store::FileQuotaStore;
